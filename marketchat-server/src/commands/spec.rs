//! Writes the OpenAPI document for the REST surface.

use crate::openapi::ApiDoc;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use utoipa::OpenApi;

/// Generates the OpenAPI document.
///
/// `output` may be `json` or `yaml` to stream that format to stdout, or a file
/// path whose extension picks the format (YAML unless it ends in `.json`).
/// Without an output the YAML document goes to stdout.
///
/// # Errors
/// Returns an error if serialization or writing fails.
pub fn generate_spec(output: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let openapi = ApiDoc::openapi();

    match output {
        Some("json") => io::stdout().write_all(openapi.to_pretty_json()?.as_bytes())?,
        Some("yaml") | None => io::stdout().write_all(openapi.to_yaml()?.as_bytes())?,
        Some(path) => {
            let path = Path::new(path);
            let is_json = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

            let document = if is_json {
                openapi.to_pretty_json()?
            } else {
                openapi.to_yaml()?
            };
            fs::write(path, document)?;
            println!("OpenAPI spec written to {}", path.display());
        }
    }

    Ok(())
}
