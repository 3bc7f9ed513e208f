//! Endpoint registration contract.
//!
//! Grounded in `examples/original_source/.../http_api.py`'s
//! `setup_endpoints`, which wires each callback to a path and HTTP method
//! through the firmware's own `web_endpoint` helper. This trait is the
//! same seam generalized to whatever HTTP framework a host binary
//! chooses — mirroring `evo_api::main`'s own placeholder stance ("in full
//! implementation this would start an HTTP server").

/// HTTP method a registered endpoint responds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A host binary implements this to wire the plotter's HTTP surface onto
/// its own framework (axum, actix-web, or otherwise).
pub trait EndpointRegistrar {
    /// Register one endpoint. `path` is relative (e.g. `"plotter/status"`,
    /// matching the original's route names exactly).
    fn register(&mut self, path: &str, method: HttpMethod);
}

/// The fixed set of routes the original firmware exposes, in
/// `setup_endpoints`'s registration order.
pub const ROUTES: &[(&str, HttpMethod)] = &[
    ("plotter/gcode", HttpMethod::Post),
    ("plotter/status", HttpMethod::Get),
    ("plotter/pause", HttpMethod::Post),
    ("plotter/stop", HttpMethod::Post),
    ("plotter/tiling", HttpMethod::Post),
    ("plotter/tiling/switch", HttpMethod::Post),
    ("plotter/play", HttpMethod::Post),
    ("plotter/test", HttpMethod::Post),
];

/// Register every route in [`ROUTES`] against `registrar`.
pub fn register_all(registrar: &mut impl EndpointRegistrar) {
    for &(path, method) in ROUTES {
        registrar.register(path, method);
    }
}
