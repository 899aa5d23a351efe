pub mod seat;
pub mod update;
pub mod user;

pub use seat::{EventId, SeatId, SeatLayout, SeatMap, SeatStatus, Section, SoldSeat};
pub use update::{Availability, SeatSnapshot, SeatUpdate, SeatUpdateEvent, SeatView};
pub use user::UserId;
