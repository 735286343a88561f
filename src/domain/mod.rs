// Domain layer: validation models and ports (interfaces) implemented by results/, jobs/ and config/.

pub mod model;
pub mod ports;
