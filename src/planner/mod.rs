//! Trip planning — request/plan types, geofencing and the orchestrator.

pub mod geofence;
pub mod model;
pub mod orchestrator;
pub mod prompts;

pub use geofence::{BoundingBox, DestinationBounds, DestinationEntry, GeoWarning, ValidationReport};
pub use model::{Attraction, Budget, DayPlan, Dining, Figure, Hotel, Location, TripPlan, TripRequest, Weather};
pub use orchestrator::{PlanOutcome, PlanningError, TripOrchestrator};
