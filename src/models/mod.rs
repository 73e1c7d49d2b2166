pub mod account;
pub mod audit;
pub mod budget;
pub mod category;
pub mod contact;
pub mod household;
pub mod income;
pub mod movement;
pub mod payment_method;
pub mod recurring;
pub mod user;

pub use account::*;
pub use audit::*;
pub use budget::*;
pub use category::*;
pub use contact::*;
pub use household::*;
pub use income::*;
pub use movement::*;
pub use payment_method::*;
pub use recurring::*;
pub use user::*;
