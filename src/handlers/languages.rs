//! `GET /languages` - the translation language table.

use crate::translation::languages::SUPPORTED_LANGUAGES;
use actix_web::HttpResponse;
use serde_json::json;

pub async fn list_languages() -> HttpResponse {
    let languages: Vec<_> = SUPPORTED_LANGUAGES
        .iter()
        .map(|lang| {
            json!({
                "code": lang.code,
                "name": lang.name,
                "native_name": lang.native_name
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "count": languages.len(),
        "languages": languages
    }))
}
