pub mod membership;

pub use membership::{is_member, JoinOutcome, PodMembershipManager};
