//! JSON action interface for the rate limit service.

mod action;
mod server;
mod service;

pub use action::{
    Action, ActionRequest, ActionResponse, CheckResponse, ConfigureResponse, ErrorResponse,
    IncrementResponse, ResetResponse, StatusResponse, NO_LIMIT_CONFIGURED,
};
pub use server::{router, HttpServer, ACTION_PATH};
pub use service::ActionService;
