use super::*;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use axum::{extract::Query, http::StatusCode, routing::get, Router};

async fn spawn_camera_endpoint(
    status: StatusCode,
    body: &'static str,
) -> (u16, Arc<Mutex<Vec<String>>>) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let app = Router::new().route(
        "/stream",
        get(move |Query(params): Query<HashMap<String, String>>| {
            let recorder = Arc::clone(&recorder);
            async move {
                if let Some(action) = params.get("action") {
                    recorder.lock().unwrap().push(action.clone());
                }
                (status, body)
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind camera endpoint");
    let port = listener.local_addr().expect("local addr").port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve camera endpoint");
    });
    (port, seen)
}

#[tokio::test]
async fn start_maps_success_to_running() {
    let (port, seen) = spawn_camera_endpoint(StatusCode::OK, "stream started").await;
    let client = CameraClient::with_port(port);

    assert_eq!(client.start_stream("127.0.0.1").await, CameraStatus::Running);
    assert_eq!(*seen.lock().unwrap(), vec!["start".to_string()]);
}

#[tokio::test]
async fn stop_maps_success_to_stopped() {
    let (port, seen) = spawn_camera_endpoint(StatusCode::OK, "stream stopped").await;
    let client = CameraClient::with_port(port);

    assert_eq!(client.stop_stream("127.0.0.1").await, CameraStatus::Stopped);
    assert_eq!(*seen.lock().unwrap(), vec!["stop".to_string()]);
}

#[tokio::test]
async fn status_sniffs_body_for_running_marker() {
    let (port, _) = spawn_camera_endpoint(StatusCode::OK, "Camera Running since boot").await;
    let client = CameraClient::with_port(port);
    assert_eq!(client.stream_status("127.0.0.1").await, CameraStatus::Running);

    let (port, _) = spawn_camera_endpoint(StatusCode::OK, "camera idle").await;
    let client = CameraClient::with_port(port);
    assert_eq!(client.stream_status("127.0.0.1").await, CameraStatus::Stopped);
}

#[tokio::test]
async fn server_error_maps_to_error_and_unknown() {
    let (port, _) = spawn_camera_endpoint(StatusCode::INTERNAL_SERVER_ERROR, "boom").await;
    let client = CameraClient::with_port(port);

    assert_eq!(client.start_stream("127.0.0.1").await, CameraStatus::Error);
    assert_eq!(client.stop_stream("127.0.0.1").await, CameraStatus::Error);
    assert_eq!(client.stream_status("127.0.0.1").await, CameraStatus::Unknown);
}

#[tokio::test]
async fn unreachable_endpoint_maps_to_error_and_unknown() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let client = CameraClient::with_port(1);

    assert_eq!(client.start_stream("127.0.0.1").await, CameraStatus::Error);
    assert_eq!(client.stream_status("127.0.0.1").await, CameraStatus::Unknown);
}
