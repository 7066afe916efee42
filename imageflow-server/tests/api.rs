//! End-to-end API tests over a local store and the in-memory index.

use axum_test::TestServer;
use axum_test::multipart::{MultipartForm, Part};
use imageflow_core::config::{
    Config, ProcessingConfig, RedisConfig, ServerConfig, StorageConfig,
};
use imageflow_core::index::{MemoryIndex, MetadataIndex};
use imageflow_core::model::{
    ImageFormat, ImageRecord, ImageSizes, Orientation, paths_for,
};
use imageflow_core::storage::{LocalStore, ObjectStore};
use imageflow_server::{AppState, build_router};
use axum::http::{StatusCode, header};
use image::{DynamicImage, RgbaImage};
use serde_json::Value;
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;

const API_KEY: &str = "test-api-key";

struct TestApp {
    server: TestServer,
    state: AppState,
    _dir: TempDir,
}

async fn test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8686,
            custom_domain: None,
        },
        storage: StorageConfig::Local {
            root: dir.path().to_string_lossy().into_owned(),
        },
        redis: RedisConfig {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
            tls: false,
            prefix: "imageflow".to_string(),
        },
        processing: ProcessingConfig {
            max_upload_count: 5,
            image_quality: 70,
            worker_threads: 2,
            speed: 8,
            worker_pool_size: 2,
            cleanup_interval_minutes: 60,
        },
        api_key: API_KEY.to_string(),
    });

    let store: Arc<dyn ObjectStore> = Arc::new(LocalStore::open(dir.path()).await.unwrap());
    let index: Arc<dyn MetadataIndex> = Arc::new(MemoryIndex::new(config.public_url_base()));
    let state = AppState::assemble(config, store, index);
    let server = TestServer::new(build_router(state.clone())).unwrap();
    TestApp { server, state, _dir: dir }
}

fn encode(img: &DynamicImage, format: image::ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).unwrap();
    out.into_inner()
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x % 256) as u8, (y % 256) as u8, 40, 255])
    }));
    encode(&img, image::ImageFormat::Png)
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    // The JPEG encoder rejects alpha channels.
    let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        width,
        height,
        image::Rgb([200, 100, 50]),
    ));
    encode(&img, image::ImageFormat::Jpeg)
}

fn gif(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, image::Rgba([1, 2, 3, 255])));
    encode(&img, image::ImageFormat::Gif)
}

fn upload_form(name: &str, bytes: Vec<u8>, tags: &str, expiry_minutes: Option<i64>) -> MultipartForm {
    let mut form = MultipartForm::new()
        .add_part("images[]", Part::bytes(bytes).file_name(name))
        .add_text("tags", tags);
    if let Some(minutes) = expiry_minutes {
        form = form.add_text("expiryMinutes", minutes.to_string());
    }
    form
}

async fn upload(app: &TestApp, name: &str, bytes: Vec<u8>, tags: &str) -> Value {
    let response = app
        .server
        .post("/api/upload")
        .add_header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
        .multipart(upload_form(name, bytes, tags, None))
        .await;
    response.assert_status(StatusCode::OK);
    let outcomes: Vec<Value> = response.json();
    assert_eq!(outcomes.len(), 1);
    outcomes.into_iter().next().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn upload_reports_urls_orientation_and_format() {
    let app = test_app().await;
    let response = app
        .server
        .post("/api/upload")
        .add_header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
        .multipart(upload_form("sunset.jpg", jpeg(192, 108), "nature,landscape", Some(60)))
        .await;
    response.assert_status(StatusCode::OK);

    let outcomes: Vec<Value> = response.json();
    let outcome = &outcomes[0];
    assert_eq!(outcome["status"], "success");
    assert_eq!(outcome["orientation"], "landscape");
    assert_eq!(outcome["format"], "jpeg");
    assert_eq!(outcome["tags"], serde_json::json!(["nature", "landscape"]));
    assert!(outcome["expiresAt"].as_i64().unwrap() > 0);

    let urls = &outcome["urls"];
    assert!(urls["original"].as_str().unwrap().contains("/original/landscape/"));
    assert!(urls["webp"].as_str().unwrap().contains("/landscape/webp/"));
    assert!(urls["avif"].as_str().unwrap().contains("/landscape/avif/"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn random_serves_the_negotiated_variant_with_no_store_caching() {
    let app = test_app().await;
    upload(&app, "wide.png", png(64, 32), "").await;

    let response = app
        .server
        .get("/api/random")
        .add_header(header::ACCEPT, "image/webp,*/*")
        .await;
    response.assert_status(StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/webp");
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "no-store, no-cache, must-revalidate, max-age=0"
    );
    assert_eq!(response.headers()[header::VARY], "Accept, User-Agent");
    assert_eq!(&response.as_bytes()[..4], b"RIFF");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn png_without_modern_accept_comes_back_as_original_png() {
    let app = test_app().await;
    let bytes = png(30, 90);
    upload(&app, "tall.png", bytes.clone(), "").await;

    let response = app
        .server
        .get("/api/random")
        .add_query_param("orientation", "portrait")
        .add_header(header::ACCEPT, "image/*")
        .await;
    response.assert_status(StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(response.as_bytes().as_ref(), bytes.as_slice());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mobile_user_agents_default_to_portrait() {
    let app = test_app().await;
    upload(&app, "wide.png", png(64, 32), "").await;
    upload(&app, "tall.png", png(32, 64), "").await;

    let response = app
        .server
        .get("/api/random")
        .add_header(header::USER_AGENT, "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)")
        .add_header(header::ACCEPT, "image/*")
        .await;
    response.assert_status(StatusCode::OK);
    let dims = image::load_from_memory(response.as_bytes()).unwrap();
    assert!(dims.height() > dims.width());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gif_uploads_serve_gif_bytes_to_webp_clients() {
    let app = test_app().await;
    let bytes = gif(10, 10);
    let outcome = upload(&app, "anim.gif", bytes.clone(), "").await;
    let urls = &outcome["urls"];
    assert!(urls["original"].as_str().unwrap().contains("/gif/"));
    assert_eq!(urls["original"], urls["webp"]);
    assert_eq!(urls["original"], urls["avif"]);

    let response = app
        .server
        .get("/api/random")
        .add_header(header::ACCEPT, "image/webp")
        .await;
    response.assert_status(StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/gif");
    assert_eq!(response.as_bytes().as_ref(), bytes.as_slice());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tag_filters_and_exclusions_shape_the_candidate_set() {
    let app = test_app().await;
    upload(&app, "a.png", png(64, 32), "nature,sunset").await;
    upload(&app, "b.png", png(64, 33), "nature,city").await;

    // AND intersection pins the result to the first upload.
    for _ in 0..25 {
        let response = app
            .server
            .get("/api/random")
            .add_query_param("tags", "nature,sunset")
            .await;
        response.assert_status(StatusCode::OK);
        let img = image::load_from_memory(response.as_bytes()).unwrap();
        assert_eq!(img.height(), 32);
    }

    // Excluding `city` has the same effect from the other side.
    for _ in 0..25 {
        let response = app
            .server
            .get("/api/random")
            .add_query_param("tag", "nature")
            .add_query_param("exclude", "city")
            .await;
        response.assert_status(StatusCode::OK);
        let img = image::load_from_memory(response.as_bytes()).unwrap();
        assert_eq!(img.height(), 32);
    }

    // No survivors: every candidate carries an excluded tag.
    let response = app
        .server
        .get("/api/random")
        .add_query_param("exclude", "nature")
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["code"], 404);
    assert!(body["error"].is_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn random_on_an_empty_library_is_404_with_the_error_envelope() {
    let app = test_app().await;
    let response = app.server.get("/api/random").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["code"], 404);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn admin_surface_requires_the_bearer_key() {
    let app = test_app().await;

    for (method, path) in [
        ("GET", "/api/images"),
        ("GET", "/api/tags"),
        ("GET", "/api/config"),
        ("POST", "/api/trigger-cleanup"),
    ] {
        let request = match method {
            "GET" => app.server.get(path),
            _ => app.server.post(path),
        };
        let response = request.await;
        response.assert_status(StatusCode::UNAUTHORIZED);

        let request = match method {
            "GET" => app.server.get(path),
            _ => app.server.post(path),
        };
        let response = request
            .add_header(header::AUTHORIZATION, "Bearer wrong-key")
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn validate_api_key_fails_closed() {
    let app = test_app().await;

    let response = app
        .server
        .post("/api/validate-api-key")
        .add_header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
        .await;
    response.assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["valid"], true);

    let response = app
        .server
        .post("/api/validate-api-key")
        .add_header(header::AUTHORIZATION, "Bearer nope")
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    let response = app.server.post("/api/validate-api-key").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn listing_clamps_limits_and_reports_totals() {
    let app = test_app().await;
    for i in 0..3 {
        upload(&app, &format!("file-{i}.png"), png(16, 8), "batch").await;
    }

    let response = app
        .server
        .get("/api/images")
        .add_query_param("limit", "51")
        .add_header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
        .await;
    response.assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["limit"], 50);
    assert_eq!(body["total"], 3);
    assert_eq!(body["totalPages"], 1);
    // Filename-descending ordering.
    assert_eq!(body["images"][0]["fileName"], "file-2.png");

    let response = app
        .server
        .get("/api/images")
        .add_query_param("limit", "0")
        .add_query_param("page", "-2")
        .add_header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
        .await;
    let body: Value = response.json();
    assert_eq!(body["limit"], 12);
    assert_eq!(body["page"], 1);

    let response = app
        .server
        .get("/api/images")
        .add_query_param("orientation", "portrait")
        .add_header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
        .await;
    let body: Value = response.json();
    assert_eq!(body["total"], 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn oversized_submissions_are_rejected_with_400() {
    let app = test_app().await;
    let mut form = MultipartForm::new();
    for i in 0..6 {
        form = form.add_part("images[]", Part::bytes(png(8, 8)).file_name(format!("f{i}.png")));
    }
    let response = app
        .server
        .post("/api/upload")
        .add_header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
        .multipart(form)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_image_removes_blobs_and_unknown_ids_stay_200() {
    let app = test_app().await;
    let outcome = upload(&app, "gone.png", png(20, 10), "doomed").await;
    let id = outcome["id"].as_str().unwrap().to_string();

    let response = app
        .server
        .post("/api/delete-image")
        .add_header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
        .json(&serde_json::json!({ "id": id }))
        .await;
    response.assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["deletedCount"], 3);

    // The random pool is empty again.
    app.server.get("/api/random").await.assert_status(StatusCode::NOT_FOUND);

    // And the tag disappeared with its last image.
    let response = app
        .server
        .get("/api/tags")
        .add_header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
        .await;
    let tags: Vec<String> = response.json();
    assert!(tags.is_empty());

    // Unknown ids are a soft failure with HTTP 200.
    let response = app
        .server
        .post("/api/delete-image")
        .add_header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
        .json(&serde_json::json!({ "id": "does-not-exist" }))
        .await;
    response.assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "no matching image files found");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tags_endpoint_returns_the_sorted_distinct_set() {
    let app = test_app().await;
    upload(&app, "a.png", png(8, 8), "zebra,apple").await;
    upload(&app, "b.png", png(8, 8), "apple,mango").await;

    let response = app
        .server
        .get("/api/tags")
        .add_header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
        .await;
    response.assert_status(StatusCode::OK);
    let tags: Vec<String> = response.json();
    assert_eq!(tags, ["apple", "mango", "zebra"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn config_endpoint_is_curated() {
    let app = test_app().await;
    let response = app
        .server
        .get("/api/config")
        .add_header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
        .await;
    response.assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["maxUploadCount"], 5);
    assert_eq!(body["imageQuality"], 70);
    assert_eq!(body["storageType"], "local");
    assert!(!response.text().contains(API_KEY));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn trigger_cleanup_sweeps_expired_records() {
    let app = test_app().await;

    // Plant an already-expired record directly; uploads can only expire in
    // the future.
    let id = "expired-fixture";
    let paths = paths_for(id, Orientation::Landscape, ImageFormat::Jpeg);
    app.state.store.store(&paths.original, b"stale").await.unwrap();
    app.state
        .index
        .save(&ImageRecord {
            id: id.to_string(),
            file_name: "stale.jpg".to_string(),
            uploaded_at: 1_000,
            expires_at: 2_000,
            format: ImageFormat::Jpeg,
            orientation: Orientation::Landscape,
            tags: Vec::new(),
            paths: paths.clone(),
            sizes: ImageSizes::default(),
        })
        .await
        .unwrap();

    let response = app
        .server
        .post("/api/trigger-cleanup")
        .add_header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
        .await;
    response.assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["removed"], 1);

    assert!(app.state.index.get(id).await.unwrap_err().is_not_found());
    assert!(app.state.store.get(&paths.original).await.unwrap_err().is_not_found());

    // Back-to-back sweeps are no-ops.
    let response = app
        .server
        .post("/api/trigger-cleanup")
        .add_header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
        .await;
    let body: Value = response.json();
    assert_eq!(body["removed"], 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn local_mode_serves_stored_blobs_with_long_lived_caching() {
    let app = test_app().await;
    let outcome = upload(&app, "static.png", png(12, 6), "").await;
    let url = outcome["urls"]["original"].as_str().unwrap();
    let path = url.strip_prefix("http://127.0.0.1:8686").unwrap();

    let response = app.server.get(path).await;
    response.assert_status(StatusCode::OK);
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "public, max-age=31536000"
    );
}
