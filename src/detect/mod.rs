mod adapter;
mod backend;
mod backends;
mod result;

pub use adapter::{select_backend, InferenceAdapter};
pub use backend::DetectorBackend;
pub use backends::{DemoBackend, ScriptedBackend, StubBackend};
pub use result::{BoundingBox, Detection, RawDetection};
