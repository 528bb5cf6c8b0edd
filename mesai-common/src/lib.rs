//! Mesai Sayaç Common Types
//!
//! Domain types and pure logic shared by the backend: identities and
//! profiles, work-hour entries with their validation rules, the statistics
//! aggregator and the route guard state machine.

pub mod guard;
pub mod profile;
pub mod stats;
pub mod work_hours;

pub use guard::{
    admin_guard, authenticated_guard, guest_guard, GuardDecision, SessionPhase, SessionSnapshot,
    DASHBOARD_PATH, LOGIN_PATH,
};
pub use profile::{Identity, NewProfile, Profile};
pub use stats::{aggregate, aggregate_on, Stats};
pub use work_hours::{
    HoursInput, NewWorkHourEntry, ValidationError, WorkHourEdit, WorkHourEntry, WorkHourForm,
    WorkHourPatch, DEFAULT_HOURS, HOUR_STEP, MAX_HOURS, QUICK_HOURS,
};
