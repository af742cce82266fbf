//! Print the strategy the default route table picks for a handful of requests.
use refresh_sync::prelude::*;
use refresh_sync::routes::cache_hit_event;

fn main() {
    let config = SyncConfig {
        schema_version: "12".into(),
        data_epoch: "2024-05".into(),
        ..SyncConfig::default()
    };
    let table = RouteTable::for_config(&config);

    let requests = [
        RouteRequest::new("GET", "https://app.test/assets/app.css").with_destination(Destination::Style),
        RouteRequest::new("GET", "https://app.test/assets/logo.svg").with_destination(Destination::Image),
        RouteRequest::new("GET", "https://app.test/api/crops?region=north"),
        RouteRequest::new("POST", "https://app.test/api/refresh"),
        RouteRequest::new("POST", "https://app.test/api/feedback"),
        RouteRequest::new("GET", "https://app.test/index.html").with_destination(Destination::Document),
    ];

    for request in &requests {
        let strategy = table.classify(request);
        print!("{:<6} {:<48} -> {}", request.method, request.url, strategy.name());
        if let Some(cache) = strategy.cache() {
            print!(" [cache {} key {}]", cache.name, cache.cache_key(request));
        }
        if let Some(queue) = strategy.retry_queue() {
            print!(" [queue {queue}]");
        }
        println!();
    }

    let hit = cache_hit_event(
        "api",
        &CapturedRequest::get("https://app.test/api/crops").with_header("x-request-id", "req-9"),
    );
    println!("\ncache hit telemetry: {hit}");
}
