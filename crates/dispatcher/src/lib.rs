pub mod driver_presence;
pub mod job_lifecycle;
pub mod keys;
pub mod matching;

pub use driver_presence::DriverPresenceService;
pub use job_lifecycle::{JobLifecycleManager, JobLifecycleService, RespondOutcome};
pub use matching::{AssignmentService, MatchingEngine, OfferOutcome};
