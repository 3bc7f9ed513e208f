//! Speed control, stepper sequencing, machine state, motion planning,
//! routines and dispatch for the plotter motion-control workspace.

pub mod dispatcher;
pub mod machine;
pub mod routines;
pub mod session;
pub mod speed_ctrl;
pub mod stepper;

pub mod prelude {
    pub use crate::dispatcher::{control_task, run_command};
    pub use crate::machine::{
        CartesianKinematics, Kinematics, Machine, Positioning, ScaraKinematics,
    };
    pub use crate::session::{file_reader, FilesystemSketchSource, SketchSource};
    pub use crate::speed_ctrl::{SpeedController, SpeedControllerGuard};
    pub use crate::stepper::{Direction, Phase, StepperAxis, StepperDriver};
}
