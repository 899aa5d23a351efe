pub mod seats;
pub mod session;
pub mod sweeper;

pub use seats::{SaleConfirmation, SeatService};
pub use session::{Session, OUTBOUND_QUEUE};
pub use sweeper::ReservationSweeper;
