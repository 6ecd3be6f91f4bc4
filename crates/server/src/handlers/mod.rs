pub mod auth;
pub mod categories;
pub mod health;
pub mod orders;
pub mod payments;
pub mod products;
pub mod wishlist;

use crate::error::ApiError;
use crate::response::ApiResponse;

pub type ApiResult = Result<ApiResponse, ApiError>;
