use figment::providers::{Format, Toml};
use figment::Figment;
use pdfqa_core::config::{expand_path, resolve_with_base, BackendKind, Config, IndexBackend, Settings};
use pdfqa_core::error::{Error, QueryError};
use pdfqa_core::types::{FileFilter, Strategy, TermWeights};
use std::path::Path;

#[test]
fn defaults_are_valid() {
    let settings = Settings::default();
    settings.validate().unwrap();
    assert_eq!(settings.chunking.target_chars, 1000);
    assert_eq!(settings.chunking.overlap_chars, 200);
    assert_eq!(settings.retrieval.max_k, 20);
    assert_eq!(settings.generation.len(), 2);
    assert_eq!(settings.index.backend, IndexBackend::Memory);
}

#[test]
fn toml_overrides_nested_values() {
    let toml = r#"
        [retrieval]
        rrf_k = 10.0
        dense_weight = 0.5

        [index]
        backend = "persistent"
        data_dir = "/tmp/pdfqa"

        [[generation]]
        name = "local"
        kind = "ollama"
        base_url = "http://localhost:11434"
        model = "llama3"

        [[generation]]
        name = "remote"
        kind = "openai"
        base_url = "https://api.openai.com/v1"
        model = "gpt-4.1-mini"
        api_key_env = "OPENAI_API_KEY"
    "#;
    let config = Config::from_figment(Figment::from(Toml::string(toml)));
    let settings = config.settings().unwrap();
    assert_eq!(settings.retrieval.rrf_k, 10.0);
    assert_eq!(settings.retrieval.dense_weight, 0.5);
    assert_eq!(settings.retrieval.sparse_weight, 1.0);
    assert_eq!(settings.index.backend, IndexBackend::Persistent);
    assert_eq!(settings.index.catalog_path(), Path::new("/tmp/pdfqa/catalog.json"));
    assert_eq!(settings.generation[0].kind, BackendKind::Ollama);
    assert_eq!(settings.generation[0].temperature, 0.3);
    assert_eq!(settings.generation[0].api_key_env, None);

    let k: usize = config.get("retrieval.max_k").unwrap();
    assert_eq!(k, 20);
}

#[test]
fn rejects_oversized_overlap() {
    let mut settings = Settings::default();
    settings.chunking.overlap_chars = 400;
    assert!(matches!(settings.validate(), Err(Error::InvalidConfig(_))));
}

#[test]
fn rejects_single_backend_and_bad_template() {
    let mut settings = Settings::default();
    settings.generation.truncate(1);
    assert!(settings.validate().is_err());

    let mut settings = Settings::default();
    settings.synthesis.prompt_template = "Answer: {question}".into();
    assert!(settings.validate().is_err());
}

#[test]
fn rejects_zero_weights() {
    let mut settings = Settings::default();
    settings.retrieval.dense_weight = 0.0;
    settings.retrieval.sparse_weight = 0.0;
    assert!(settings.validate().is_err());
}

#[test]
fn rerank_threshold_must_be_a_probability() {
    let mut settings = Settings::default();
    assert!(!settings.rerank.enabled);
    settings.retrieval.rerank_threshold = 1.5;
    assert!(settings.validate().is_err());
    settings.retrieval.rerank_threshold = 0.0;
    settings.rerank.enabled = true;
    settings.rerank.request_timeout_secs = 0;
    assert!(settings.validate().is_err());
}

#[test]
fn strategy_parsing() {
    assert_eq!("HYBRID".parse::<Strategy>().unwrap(), Strategy::Hybrid);
    assert_eq!(" dense ".parse::<Strategy>().unwrap(), Strategy::Dense);
    assert!(matches!("fuzzy".parse::<Strategy>(), Err(QueryError::InvalidStrategy(s)) if s == "fuzzy"));
    assert_eq!(Strategy::default(), Strategy::Hybrid);
}

#[test]
fn term_weights_drop_non_positive() {
    let w = TermWeights::new(vec![("a", 2.0), ("b", 0.0), ("c", -1.0), ("d", f32::NAN)]);
    assert_eq!(w.len(), 1);
    assert_eq!(w.get("a"), Some(2.0));
    assert_eq!(w.total(), 2.0);
}

#[test]
fn empty_file_filter_is_unrestricted() {
    let all = FileFilter::all();
    assert!(all.is_unrestricted());
    assert!(all.allows("anything.pdf"));
    let some = FileFilter::only(["a.pdf"]);
    assert!(some.allows("a.pdf"));
    assert!(!some.allows("b.pdf"));
}

#[test]
fn expand_and_resolve_paths() {
    std::env::set_var("PDFQA_TEST_ROOT", "/srv/pdfqa");
    assert_eq!(expand_path("${PDFQA_TEST_ROOT}/data"), Path::new("/srv/pdfqa/data"));
    assert_eq!(resolve_with_base(Path::new("/base"), "rel/dir"), Path::new("/base/rel/dir"));
    assert_eq!(resolve_with_base(Path::new("/base"), "/abs"), Path::new("/abs"));
}
