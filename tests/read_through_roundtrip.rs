// End-to-end round trip without a broker: the read-through miss enqueues an
// envelope, the processor consumes that exact envelope against a shared
// store, and the next lookup returns the terminal payload.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use httptest::{matchers::*, responders::*, Expectation, Server};

use metadata_pipeline::api::ApiState;
use metadata_pipeline::fetch::MetadataFetcher;
use metadata_pipeline::messaging::{InMemoryPublisher, MessagePublisher};
use metadata_pipeline::storage::MetadataRepository;
use metadata_pipeline::worker::{ProcessOutcome, Processor};

#[tokio::test]
async fn test_get_miss_then_worker_then_get_hit() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/page"))
            .respond_with(status_code(200).body("<html>roundtrip</html>")),
    );
    let target_url = server.url_str("/page");

    let (repository, _pool) = helpers::create_test_repository().await;
    let repository: Arc<dyn MetadataRepository> = repository;
    let publisher = Arc::new(InMemoryPublisher::new(16));
    let state = ApiState {
        publisher: Arc::clone(&publisher) as Arc<dyn MessagePublisher>,
        repository: Arc::clone(&repository),
        settings: helpers::test_settings(),
    };
    let base = helpers::spawn_api(state).await;

    // 1. Lookup miss: 202 QUEUED, envelope buffered, PENDING record seeded.
    let response = reqwest::get(format!("{base}/metadata?url={target_url}"))
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
    let queued: serde_json::Value = response.json().await.unwrap();
    assert_eq!(queued["status"], "QUEUED");

    let envelopes = publisher.published();
    assert_eq!(envelopes.len(), 1);
    let record = repository.get(&envelopes[0].url).await.unwrap().unwrap();
    assert_eq!(record.status, "PENDING");

    // 2. The worker consumes the buffered envelope.
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let processor = Processor::new(
        Arc::clone(&repository),
        MetadataFetcher::new(Arc::new(client)),
        3,
        1_000_000,
    );
    let body = serde_json::to_vec(&envelopes[0]).unwrap();
    let outcome = processor.process(&body).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Completed);

    // 3. Lookup hit: 200 with the stored metadata, no new enqueue.
    let response = reqwest::get(format!("{base}/metadata?url={target_url}"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let found: serde_json::Value = response.json().await.unwrap();
    assert_eq!(found["status"], "COMPLETED");
    assert_eq!(found["metadata"]["page_source"], "<html>roundtrip</html>");
    assert_eq!(found["metadata"]["status_code"], 200);

    assert_eq!(publisher.len(), 1, "hit must not enqueue again");
}
