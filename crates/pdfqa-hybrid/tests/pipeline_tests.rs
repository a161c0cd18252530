mod common;

use common::*;
use pdfqa_core::error::{Error, GenerationError, IngestionError, QueryError, SynthesisError};
use pdfqa_core::types::{DocumentStatus, Strategy, UploadedFile};
use pdfqa_core::traits::Generator;
use pdfqa_hybrid::QuestionRequest;
use std::sync::Arc;

fn upload(name: &str, text: &str) -> UploadedFile { UploadedFile::new(name, text.as_bytes().to_vec()) }

#[tokio::test]
async fn two_page_document_yields_four_chunks() {
    let pipeline = pipeline(answering());
    let report = pipeline.process_documents(vec![upload("notes.txt", &two_page_text())], None).await.unwrap();
    assert_eq!(report.documents_indexed, 1);
    assert_eq!(report.total_chunks, 4);
    assert_eq!(report.files[0].status, DocumentStatus::Indexed);

    let status = pipeline.status();
    assert_eq!(status.index.documents, 1);
    assert_eq!(status.index.chunks, 4);
    assert_eq!(status.backends, vec!["primary", "fallback"]);
    assert_eq!(status.strategies, vec!["dense", "sparse", "hybrid"]);
}

#[tokio::test]
async fn empty_batch_is_rejected() {
    let pipeline = pipeline(answering());
    let err = pipeline.process_documents(Vec::new(), None).await.unwrap_err();
    assert!(matches!(err, IngestionError::NoFiles));
}

#[tokio::test]
async fn bad_files_are_reported_without_aborting_the_batch() {
    let mut settings = settings();
    settings.ingest.require_pdf = true;
    let pipeline = pipeline_with(settings, answering());
    let files = vec![
        upload("empty.pdf", ""),
        upload("notes.txt", "compost heaps need air"),
        UploadedFile::new("real.pdf", b"\xff\xfe not utf8".to_vec()),
        upload("blank.pdf", "   \u{000C}  "),
        upload("ok.pdf", "compost heaps need air"),
    ];
    let report = pipeline.process_documents(files, None).await.unwrap();
    let statuses: Vec<DocumentStatus> = report.files.iter().map(|f| f.status).collect();
    assert_eq!(
        statuses,
        vec![DocumentStatus::Failed, DocumentStatus::Failed, DocumentStatus::Failed, DocumentStatus::Failed, DocumentStatus::Indexed]
    );
    assert_eq!(report.documents_indexed, 1);
    assert_eq!(report.total_chunks, 1);
    assert!(report.files[1].error.as_deref().unwrap().contains("only PDF"));
    assert!(report.files[3].error.as_deref().unwrap().contains("No text content"));
    // extraction and empty-document failures are kept in the catalog
    assert_eq!(pipeline.status().index.failed, 2);
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let mut settings = settings();
    settings.ingest.max_file_size_mb = 1;
    let pipeline = pipeline_with(settings, answering());
    let big = UploadedFile::new("big.txt", vec![b'a'; 1024 * 1024 + 1]);
    let report = pipeline.process_documents(vec![big], None).await.unwrap();
    assert_eq!(report.documents_indexed, 0);
    assert!(report.files[0].error.as_deref().unwrap().contains("MB limit"));
}

#[tokio::test]
async fn dense_query_with_single_chunk_returns_one_candidate() {
    let pipeline = pipeline(answering());
    pipeline.process_documents(vec![upload("bees.txt", "keep the hive entrance clear in winter")], None).await.unwrap();
    let request = QuestionRequest { strategy: Some("dense".into()), max_documents: Some(5), ..QuestionRequest::new("hive entrance winter") };
    let candidates = pipeline.search(&request).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].dense_rank, Some(1));
    assert_eq!(candidates[0].sparse_rank, None);
}

#[tokio::test]
async fn answer_references_are_candidate_texts() {
    let pipeline = pipeline(answering());
    let files = vec![
        upload("bees.txt", "keep the hive entrance clear in winter"),
        upload("goats.txt", "goats need a dry shelter and fresh hay"),
        upload("garden.txt", "sow peas early in spring"),
    ];
    pipeline.process_documents(files, None).await.unwrap();

    let request = QuestionRequest { max_documents: Some(2), ..QuestionRequest::new("what shelter do goats need") };
    let candidates = pipeline.search(&request).await.unwrap();
    let answer = pipeline.answer_question(&request).await.unwrap();

    assert_eq!(answer.answer, "From the notes.");
    assert_eq!(answer.backend.as_deref(), Some("primary"));
    assert_eq!(answer.references.len(), 2);
    let texts: Vec<&str> = candidates.iter().map(|c| c.chunk.text.as_str()).collect();
    assert_eq!(answer.references, texts);
    assert_eq!(answer.references[0], "goats need a dry shelter and fresh hay");
}

#[tokio::test]
async fn empty_index_gets_insufficient_context_answer_without_backend_call() {
    let primary = MockBackend::new("primary", Reply::Text("hallucination"));
    let pipeline = pipeline(vec![primary.clone() as Arc<dyn Generator>, MockBackend::new("fallback", Reply::Text("no"))]);
    let answer = pipeline.answer_question(&QuestionRequest::new("how deep to plant garlic")).await.unwrap();
    assert_eq!(answer.answer, settings().synthesis.insufficient_context_answer);
    assert!(answer.references.is_empty());
    assert_eq!(answer.backend, None);
    assert_eq!(primary.calls(), 0);
}

#[tokio::test]
async fn session_uploads_narrow_retrieval() {
    let pipeline = pipeline(answering());
    pipeline.process_documents(vec![upload("mine.txt", "rotate the chicken run monthly")], Some("s1")).await.unwrap();
    pipeline.process_documents(vec![upload("theirs.txt", "rotate the chicken coop bedding weekly")], Some("s2")).await.unwrap();

    let mut request = QuestionRequest { session_id: Some("s1".into()), ..QuestionRequest::new("rotate chicken") };
    let files: Vec<String> = pipeline.search(&request).await.unwrap().iter().map(|c| c.chunk.filename.clone()).collect();
    assert_eq!(files, vec!["mine.txt"]);

    // explicit filters take precedence over the session
    request.file_filters = Some(vec!["theirs.txt".into()]);
    let files: Vec<String> = pipeline.search(&request).await.unwrap().iter().map(|c| c.chunk.filename.clone()).collect();
    assert_eq!(files, vec!["theirs.txt"]);

    // no session, no filter: everything is searchable
    let all = pipeline.search(&QuestionRequest::new("rotate chicken")).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(pipeline.status().sessions, 2);
}

#[tokio::test]
async fn session_restriction_can_be_disabled() {
    let mut settings = settings();
    settings.session.restrict_to_session = false;
    let pipeline = pipeline_with(settings, answering());
    pipeline.process_documents(vec![upload("mine.txt", "rotate the chicken run monthly")], Some("s1")).await.unwrap();
    pipeline.process_documents(vec![upload("theirs.txt", "rotate the chicken coop bedding weekly")], Some("s2")).await.unwrap();
    let request = QuestionRequest { session_id: Some("s1".into()), ..QuestionRequest::new("rotate chicken") };
    assert_eq!(pipeline.search(&request).await.unwrap().len(), 2);
}

#[tokio::test]
async fn invalid_strategy_and_k_are_rejected() {
    let pipeline = pipeline(answering());
    pipeline.process_documents(vec![upload("bees.txt", "keep the hive entrance clear")], None).await.unwrap();

    let request = QuestionRequest { strategy: Some("fuzzy".into()), ..QuestionRequest::new("hive") };
    assert!(matches!(pipeline.answer_question(&request).await, Err(Error::Query(QueryError::InvalidStrategy(_)))));

    for k in [0, 21] {
        let request = QuestionRequest { max_documents: Some(k), ..QuestionRequest::new("hive") };
        assert!(matches!(pipeline.search(&request).await, Err(Error::Query(QueryError::InvalidK { .. }))), "k = {}", k);
    }

    let request = QuestionRequest::new("   ");
    assert!(matches!(pipeline.search(&request).await, Err(Error::Query(QueryError::InvalidQuestion(_)))));
}

#[tokio::test]
async fn every_strategy_finds_the_matching_chunk() {
    let pipeline = pipeline(answering());
    let files = vec![upload("bees.txt", "keep the hive entrance clear in winter"), upload("goats.txt", "goats need fresh hay")];
    pipeline.process_documents(files, None).await.unwrap();
    for strategy in Strategy::ALL {
        let request = QuestionRequest { strategy: Some(strategy.to_string()), ..QuestionRequest::new("goats hay") };
        let candidates = pipeline.search(&request).await.unwrap();
        assert_eq!(candidates[0].chunk.filename, "goats.txt", "strategy {}", strategy);
    }
}

#[tokio::test]
async fn hybrid_results_are_repeatable() {
    let pipeline = pipeline(answering());
    let files = vec![
        upload("a.txt", "mulch keeps soil moist"),
        upload("b.txt", "mulch the strawberries in autumn"),
        upload("c.txt", "moist soil helps seeds sprout"),
    ];
    pipeline.process_documents(files, None).await.unwrap();
    let request = QuestionRequest::new("mulch moist soil");
    let first: Vec<String> = pipeline.search(&request).await.unwrap().iter().map(|c| c.chunk.id.clone()).collect();
    for _ in 0..5 {
        let again: Vec<String> = pipeline.search(&request).await.unwrap().iter().map(|c| c.chunk.id.clone()).collect();
        assert_eq!(again, first);
    }
}

#[tokio::test]
async fn reuploading_the_same_file_keeps_one_copy() {
    let pipeline = pipeline(answering());
    for _ in 0..2 {
        let report = pipeline.process_documents(vec![upload("notes.txt", &two_page_text())], None).await.unwrap();
        assert_eq!(report.total_chunks, 4);
    }
    assert_eq!(pipeline.status().index.chunks, 4);
    let request = QuestionRequest { strategy: Some("sparse".into()), max_documents: Some(20), ..QuestionRequest::new("word") };
    assert_eq!(pipeline.search(&request).await.unwrap().len(), 4);
}

#[tokio::test]
async fn deleted_document_is_no_longer_retrieved() {
    let pipeline = pipeline(answering());
    let report = pipeline.process_documents(vec![upload("bees.txt", "keep the hive entrance clear")], None).await.unwrap();
    let id = report.files[0].document_id.clone().unwrap();
    assert_eq!(pipeline.delete_document(&id).await.unwrap(), 1);
    assert!(pipeline.search(&QuestionRequest::new("hive")).await.unwrap().is_empty());
    assert!(matches!(pipeline.delete_document(&id).await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn both_backends_failing_surfaces_a_synthesis_error() {
    let backends = vec![
        MockBackend::new("primary", Reply::Fail(GenerationError::RateLimited)) as Arc<dyn Generator>,
        MockBackend::new("fallback", Reply::Fail(GenerationError::Transport("connection refused".into()))),
    ];
    let pipeline = pipeline(backends);
    pipeline.process_documents(vec![upload("bees.txt", "keep the hive entrance clear")], None).await.unwrap();

    let err = pipeline.answer_question(&QuestionRequest::new("hive entrance")).await.unwrap_err();
    let Error::Synthesis(SynthesisError::AllBackendsFailed { attempts }) = err else { panic!("unexpected {:?}", err) };
    let names: Vec<&str> = attempts.iter().map(|a| a.backend.as_str()).collect();
    assert_eq!(names, vec!["primary", "fallback"]);
    assert_eq!(attempts[0].error, GenerationError::RateLimited);
}
