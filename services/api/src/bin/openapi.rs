//! services/api/src/bin/openapi.rs
//!
//! Writes the OpenAPI document for the study companion API, by default to
//! `openapi.json`. Pass a path as the first argument to write elsewhere.

use api_lib::web::rest::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openapi.json".to_string());

    let api_doc = ApiDoc::openapi();
    let endpoints = api_doc.paths.paths.len();
    std::fs::write(&path, api_doc.to_pretty_json()?)?;
    println!("✅ OpenAPI specification with {} paths written to {}", endpoints, path);
    Ok(())
}
