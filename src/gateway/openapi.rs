//! OpenAPI / Swagger UI Documentation
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::OpenApi;

use crate::gateway::handlers::HealthResponse;
use crate::gateway::types::{
    AccountData, OpenAccountRequest, TransferAccepted, TransferData, TransferRequestDto,
    TransferStatusData,
};

/// Main API Documentation struct
#[derive(OpenApi)]
#[openapi(
    info(
        title = "KC Bank Transfer API",
        version = "1.0.0",
        description = "Account ledger with idempotent, exactly-once funds transfers.",
        license(
            name = "MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::health::health_check,
        crate::gateway::handlers::account::open_account,
        crate::gateway::handlers::account::list_accounts,
        crate::gateway::handlers::account::get_account,
        crate::gateway::handlers::transfer::create_transfer,
        crate::gateway::handlers::transfer::create_transfer_async,
        crate::gateway::handlers::transfer::get_transfer,
    ),
    components(
        schemas(
            HealthResponse,
            OpenAccountRequest,
            AccountData,
            TransferRequestDto,
            TransferData,
            TransferAccepted,
            TransferStatusData,
        )
    ),
    tags(
        (name = "System", description = "Service health"),
        (name = "Account", description = "Account opening and lookup"),
        (name = "Transfer", description = "Funds transfers between accounts")
    )
)]
pub struct ApiDoc;
