// tests/logging_filter.rs

use tracing_subscriber::filter::LevelFilter;

use etldag::cli::LogLevel;
use etldag::logging::resolve_filter;

#[test]
fn cli_level_wins_over_the_environment() {
    let filter = resolve_filter(Some(LogLevel::Error), Some("trace"));
    assert_eq!(filter.max_level_hint(), Some(LevelFilter::ERROR));
}

#[test]
fn environment_directives_are_used_without_a_cli_level() {
    let filter = resolve_filter(None, Some("warn,etldag::events=debug"));
    assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));

    let filter = resolve_filter(None, Some(" debug "));
    assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
}

#[test]
fn missing_or_invalid_environment_falls_back_to_info() {
    for env in [None, Some(""), Some("   "), Some("etldag=loud")] {
        let filter = resolve_filter(None, env);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO), "{env:?}");
    }
}
