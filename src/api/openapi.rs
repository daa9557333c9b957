//! OpenAPI documentation and schema generation

use utoipa::OpenApi;

/// OpenAPI documentation for the feedmatch upload API
///
/// Served as JSON at `/openapi.json` and through Swagger UI at `/api/docs`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "feedmatch API",
        version = "0.1.0",
        description = "Upload a product feed and collect matched products from the report service into one document",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:5000", description = "Local development server")
    ),
    paths(
        crate::api::routes::upload_feed,
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
    ),
    components(schemas(
        crate::types::Product,
        crate::types::RunReport,
        crate::types::GroupFailure,
        crate::error::ApiError,
        crate::error::ErrorDetail,
        crate::error::ServiceStage,
    )),
    tags(
        (name = "pipeline", description = "Feed upload and pipeline runs"),
        (name = "system", description = "Health and API documentation")
    )
)]
pub struct ApiDoc;
