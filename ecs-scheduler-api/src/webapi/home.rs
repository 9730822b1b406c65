//! Root url resource.

use axum::Json;
use serde_json::{json, Value};

/// Available endpoints for the web api.
pub async fn home() -> Json<Value> {
    Json(json!({
        "resources": [
            {
                "link": {
                    "rel": "jobs",
                    "title": "Jobs",
                    "href": "/jobs",
                },
            },
            {
                "link": {
                    "rel": "spec",
                    "title": "Spec",
                    "href": "/spec",
                },
            },
        ],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_home_lists_resources() {
        let Json(body) = home().await;
        let resources = body["resources"].as_array().unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0]["link"]["href"], "/jobs");
        assert_eq!(resources[1]["link"]["href"], "/spec");
    }
}
