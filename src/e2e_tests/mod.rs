#[cfg(test)]
mod tests {
    use hyper::{Body, Client, Method, Request, StatusCode};
    use rand::distributions::Alphanumeric;
    use rand::{thread_rng, Rng};
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::api::build_runtime;
    use crate::config::testdata;
    use crate::datastore::ShardedMemoryStorage;

    fn random_name() -> String {
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(30)
            .map(char::from)
            .collect()
    }

    async fn send(
        addr: SocketAddr,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let client = Client::new();
        let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
        let req = Request::builder()
            .method(method)
            .uri(format!("http://{}{}", addr, path))
            .header("content-type", "application/json")
            .body(body)
            .unwrap();

        let response = client.request(req).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[test]
    fn test_e2e_task_lifecycle() {
        let cfg = testdata::test_config();
        let storage = Arc::new(ShardedMemoryStorage::new(cfg.storage.max_tasks));
        let api = build_runtime(cfg, storage).unwrap();
        let addr = api.local_addr();

        let client_rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        client_rt.block_on(async move {
            // GIVEN three tasks published concurrently
            let names: Vec<String> = (0..3).map(|_| random_name()).collect();
            let handles: Vec<_> = names
                .iter()
                .cloned()
                .map(|name| {
                    tokio::spawn(async move {
                        send(
                            addr,
                            Method::POST,
                            "/api/v1/tasks",
                            Some(json!({ "name": name })),
                        )
                        .await
                    })
                })
                .collect();

            let mut ids = vec![];
            for result in futures::future::join_all(handles).await {
                let (status, body) = result.unwrap();
                assert_eq!(status, StatusCode::CREATED);
                ids.push(body["data"]["id"].as_str().unwrap().to_string());
            }

            // WHEN listing
            let (status, body) = send(addr, Method::GET, "/api/v1/tasks", None).await;

            // THEN every published task is there
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["count"], 3);

            // WHEN completing one
            let path = format!("/api/v1/tasks/{}", ids[0]);
            let (status, body) =
                send(addr, Method::PUT, &path, Some(json!({ "status": 1 }))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["data"]["status"], 1);

            // THEN it shows up under completed
            let (_, body) = send(addr, Method::GET, "/api/v1/tasks/status/1", None).await;
            assert_eq!(body["count"], 1);
            assert_eq!(body["data"][0]["id"], ids[0].as_str());

            let (status, _) = send(addr, Method::DELETE, &path, None).await;
            assert_eq!(status, StatusCode::OK);
            let (status, _) = send(addr, Method::GET, &path, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);

            let (status, body) = send(addr, Method::GET, "/health", None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "healthy");
        });
        drop(client_rt);

        api.stop(Duration::from_secs(1));
    }
}
