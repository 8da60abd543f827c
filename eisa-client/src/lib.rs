pub mod client;
pub mod error;
pub mod flatten;
pub mod page;

pub use client::{Credentials, EisaClient};
pub use error::{ApiError, FetchCause};
pub use flatten::{Record, flatten_record};
pub use page::{Page, ResourceDescriptor};
