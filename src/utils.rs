use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde::Serialize;

/// Walk the `source` chain, so that `Debug` output in logs shows every layer
/// of an error instead of just the outermost one
pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }
    Ok(())
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// `{"error": "..."}` with the given status
pub fn json_error(
    status: StatusCode,
    message: &str,
) -> HttpResponse {
    HttpResponse::build(status).json(ErrorBody { error: message })
}
