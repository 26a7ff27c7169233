/// Liveness and readiness checks.
pub mod health;
/// `/api/messages` routes.
pub mod messages;
/// `OpenAPI` document and Swagger UI.
pub mod openapi;
