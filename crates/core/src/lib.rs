//! Pure domain logic for the submission pipeline: apex-zone extraction,
//! outcome codes, the error taxonomy and the cancellation handle shared by
//! every stage.
pub mod apex;
pub mod cancel;
pub mod outcome;

pub use apex::{extract_apex_zone, ExtractError, MAX_HOST_DOTS};
pub use cancel::{Cancellation, Cancelled};
pub use outcome::{ErrorKind, Outcome};
