pub mod clock;
pub mod controller;
pub mod registry;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{CallControllerBuilder, CallSessionController};
pub use registry::CallRegistry;
pub use state::{ActiveCallInfo, CallEvent, CallOutcome, CallState, OutgoingCall};
