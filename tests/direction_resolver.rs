/// Direction discovery and activation against scripted toggles.
mod common;

use std::time::{Duration, Instant};

use aadt_harvest::{DirectionCode, DirectionResolver, PageDriver, StationId};
use common::{init_logger, row, test_config, ScriptedDriver, StationScript, ViewScript};
use tempfile::tempdir;

fn one_page(year: &str) -> ViewScript {
    ViewScript::pages(vec![vec![row(year, "1,000")]])
}

#[tokio::test]
async fn discovered_value_drives_activation() {
    init_logger();
    let dir = tempdir().unwrap();
    let cfg = test_config(dir.path());
    let station = StationScript::two_way(one_page("2021")).with_direction_value(
        DirectionCode::Northbound,
        "NORTHBOUND",
        true,
        one_page("2021"),
    );
    let driver = ScriptedDriver::new(&cfg.selectors).station("N1", station);
    let mut session = driver.open(&StationId::from("N1")).await.unwrap();
    let resolver = DirectionResolver::new(&cfg.selectors, Duration::ZERO);

    let found = resolver.discover(&mut session).await;
    assert_eq!(found.get(&DirectionCode::Northbound).map(String::as_str), Some("NORTHBOUND"));

    assert!(
        resolver
            .activate(&mut session, DirectionCode::Northbound, "NORTHBOUND", cfg.extraction.activation_timeout())
            .await
    );
    // The short code is not what this page renders.
    assert!(
        !resolver
            .activate(&mut session, DirectionCode::Northbound, "NB", Duration::from_millis(50))
            .await
    );
}

#[tokio::test]
async fn unconfirmed_activation_stays_within_timeout() {
    init_logger();
    let dir = tempdir().unwrap();
    let cfg = test_config(dir.path());
    let station = StationScript::two_way(one_page("2021")).with_direction(
        DirectionCode::Westbound,
        false,
        one_page("2021"),
    );
    let driver = ScriptedDriver::new(&cfg.selectors).station("W1", station);
    let mut session = driver.open(&StationId::from("W1")).await.unwrap();
    // Settle pause far longer than the activation budget.
    let resolver = DirectionResolver::new(&cfg.selectors, Duration::from_secs(30));

    let started = Instant::now();
    let confirmed = resolver
        .activate(&mut session, DirectionCode::Westbound, "WB", Duration::from_millis(300))
        .await;

    assert!(!confirmed);
    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
}
