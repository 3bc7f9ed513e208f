//! HTTP-facing handler contracts, status JSON, endpoint registration and a
//! simulation pin backend for the plotter motion-control workspace.

pub mod handlers;
pub mod registrar;
pub mod sim;
pub mod status;

pub mod prelude {
    pub use crate::handlers::Session;
    pub use crate::registrar::{register_all, EndpointRegistrar, HttpMethod, ROUTES};
    pub use crate::sim::{sim_axis_pins, SimInputHandle, SimOutputPin, SimPwmPin};
    pub use crate::status::PlotterStatus;
}
