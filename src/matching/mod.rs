pub mod protocol;
pub mod session;
pub mod stream;

pub use protocol::{Candidate, MapMatchRequest, MapMatchResponse, MatchedGpsPoint};
pub use session::{EstimationState, MatchOutcome, MatchSession, NOT_STARTED_EDGE_ID};
pub use stream::{MatchMessages, MatchStream, ServerEvent, StreamError};
