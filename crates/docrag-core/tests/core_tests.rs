use docrag_core::config::{Config, Settings, StoreBackend};
use docrag_core::validate::ChunkIndexPolicy;
use docrag_core::{Chunk, FetchQuery, SearchHit, SearchResult};
use figment::Jail;

#[test]
fn defaults_apply_without_config_files() {
    Jail::expect_with(|_jail| {
        let settings = Config::load_for_env("test").and_then(|c| c.settings()).map_err(|e| e.to_string())?;
        assert_eq!(settings.store.backend, StoreBackend::Memory);
        assert_eq!(settings.retrieval.fetch_limit, 1000);
        assert_eq!(settings.retrieval.default_limit, 5);
        assert_eq!(settings.ingest.chunk_size, 1000);
        assert_eq!(settings.ingest.chunk_overlap, 200);
        assert_eq!(settings.embedding.dimension, 1024);
        Ok(())
    });
}

#[test]
fn env_file_and_variables_layer_in_order() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", r#"
            [store]
            backend = "memory"
            table = "base"

            [retrieval]
            default_limit = 7
        "#)?;
        jail.create_file("config.prod.toml", r#"
            [store]
            backend = "lance"
            path = "/var/lib/docrag"
            chunk_index_policy = "lenient"
        "#)?;
        jail.set_env("APP_RETRIEVAL__DEFAULT_LIMIT", "9");

        let config = Config::load_for_env("prod").map_err(|e| e.to_string())?;
        let settings = config.settings().map_err(|e| e.to_string())?;
        assert_eq!(settings.store.backend, StoreBackend::Lance);
        assert_eq!(settings.store.table, "base");
        assert_eq!(settings.store.path.as_deref(), Some("/var/lib/docrag"));
        assert_eq!(settings.store.chunk_index_policy, ChunkIndexPolicy::Lenient);
        assert_eq!(settings.retrieval.default_limit, 9);
        assert_eq!(config.get::<String>("store.table").map_err(|e| e.to_string())?, "base");
        Ok(())
    });
}

#[test]
fn invalid_settings_are_rejected() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", r#"
            [ingest]
            chunk_size = 100
            chunk_overlap = 100
        "#)?;
        let config = Config::load_for_env("dev").map_err(|e| e.to_string())?;
        assert!(config.settings().is_err());
        Ok(())
    });
}

#[test]
fn zero_fetch_limit_is_rejected() {
    Jail::expect_with(|jail| {
        jail.set_env("APP_RETRIEVAL__FETCH_LIMIT", "0");
        let err = Config::load_for_env("test").and_then(|c| c.settings()).unwrap_err();
        assert!(err.to_string().contains("retrieval.fetch_limit"), "{err}");

        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());
        settings.retrieval.fetch_limit = 0;
        assert!(settings.validate().is_err());
        Ok(())
    });
}

#[test]
fn context_json_carries_content_and_metadata() {
    let chunk = Chunk::new("ns-chunk-0", vec![1.0], "Termination requires 30 days notice.", "contract_a.pdf", 2, 0);
    let result = SearchResult {
        hits: vec![SearchHit { id: chunk.id.clone(), text: chunk.text.clone(), metadata: chunk.metadata.clone(), score: 0.75 }],
    };
    let json: serde_json::Value = serde_json::from_str(&result.to_context_json().expect("json")).expect("parse");
    let record = &json[0];
    assert_eq!(record["content"], "Termination requires 30 days notice.");
    assert_eq!(record["metadata"]["filename"]["value"], "contract_a.pdf");
    assert_eq!(record["metadata"]["page"]["value"], 2);
}

#[test]
fn fetch_query_describes_itself() {
    let q = FetchQuery::new().filter("filename", "missing.pdf");
    assert_eq!(q.to_string(), "namespace=* filter={filename=\"missing.pdf\"}");
}
