mod badge;
mod envelope;
mod fee;
mod progress;
mod snapshot;
mod tier;

pub use badge::*;
pub use envelope::*;
pub use fee::*;
pub use progress::*;
pub use snapshot::*;
pub use tier::*;
