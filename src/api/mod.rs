mod handlers;
mod routes;
mod state;
mod types;

pub use routes::create_router;
pub use state::AppState;
