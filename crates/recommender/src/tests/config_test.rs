//! Recommender configuration defaults and validation

use crate::RecommenderConfig;
use moovies_core::config::ConfigLoader;
use moovies_core::MooviesError;

#[test]
fn test_defaults() {
    let config = RecommenderConfig::default();
    assert_eq!(config.embedding_dim, 128);
    assert_eq!(config.max_genres, 5);
    assert_eq!(config.negative_ratio, 4);
    assert_eq!(config.sampling_seed, 42);
    assert_eq!(config.neighbor_count, 20);
    assert_eq!(config.top_n, 10);
    assert!(config.validate().is_ok());
}

#[test]
fn test_derived_component_configs() {
    let config = RecommenderConfig {
        negative_retry_cap: 8,
        neighbor_count: 5,
        top_n: 3,
        retry_max_attempts: 1,
        ..Default::default()
    };

    assert_eq!(config.sampling().retry_cap, 8);
    assert_eq!(config.engine().neighbor_count, 5);
    assert_eq!(config.engine().top_n, 3);
    assert_eq!(config.retry_policy().max_attempts, 1);
    assert_eq!(config.retry_policy().backoff().count(), 0);
}

#[test]
fn test_zero_retry_attempts_is_rejected() {
    let config = RecommenderConfig {
        retry_max_attempts: 0,
        ..Default::default()
    };
    let err = config.validate().unwrap_err();
    assert_eq!(err.config_key(), Some("MOOVIES_RETRY_MAX_ATTEMPTS"));
}

#[test]
fn test_embedding_dim_must_match_vector_columns() {
    for dim in [0, 64, 256] {
        let config = RecommenderConfig {
            embedding_dim: dim,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.config_key(), Some("MOOVIES_EMBEDDING_DIM"));
    }
}

#[test]
fn test_zero_top_n_is_rejected() {
    let config = RecommenderConfig {
        top_n: 0,
        ..Default::default()
    };
    let err = config.validate().unwrap_err();
    assert_eq!(err.config_key(), Some("MOOVIES_TOP_N"));
}

#[test]
fn test_validation_fraction_range() {
    for fraction in [1.0, -0.1, f64::NAN] {
        let config = RecommenderConfig {
            validation_fraction: fraction,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(MooviesError::ConfigurationError { .. })
        ));
    }

    let config = RecommenderConfig {
        validation_fraction: 0.0,
        ..Default::default()
    };
    assert!(config.validate().is_ok());
}

// Both cases in one test: env vars are process-wide
#[test]
fn test_from_env_reads_prefixed_keys() {
    std::env::set_var("MOOVIES_NEIGHBOR_COUNT", "7");
    let config = RecommenderConfig::from_env();
    std::env::remove_var("MOOVIES_NEIGHBOR_COUNT");
    assert_eq!(config.unwrap().neighbor_count, 7);

    std::env::set_var("MOOVIES_BATCH_CONCURRENCY", "many");
    let result = RecommenderConfig::from_env();
    std::env::remove_var("MOOVIES_BATCH_CONCURRENCY");
    assert_eq!(
        result.unwrap_err().config_key(),
        Some("MOOVIES_BATCH_CONCURRENCY")
    );
}
