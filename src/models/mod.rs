pub mod annotation;
pub mod segment;
pub mod time;
pub mod waveform;
pub mod window;

pub use annotation::*;
pub use segment::*;
pub use time::*;
pub use waveform::*;
pub use window::*;
