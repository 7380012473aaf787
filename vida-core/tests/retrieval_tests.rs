use std::fs;

use vida_core::services::retrieval::{
    Corpus, CorpusEntry, TextVector, VECTOR_DIM, build_vector, similarity,
};

#[test]
fn self_similarity_is_one() {
    for text in ["hola", "Tengo miedo de la quimioterapia", "uno uno dos tres"] {
        let v = build_vector(text);
        assert!((similarity(&v, &v) - 1.0).abs() < 1e-9, "{text}");
    }
}

#[test]
fn vectors_have_fixed_length_and_frequency_weights() {
    let v = build_vector("Hola hola MUNDO");
    assert_eq!(v.len(), VECTOR_DIM);
    let w = v.as_slice();
    assert!((w[0] - 2.0 / 3.0).abs() < 1e-12);
    assert!((w[1] - 1.0 / 3.0).abs() < 1e-12);
    assert!(w[2..].iter().all(|x| *x == 0.0));
}

#[test]
fn tokens_past_the_last_slot_are_dropped() {
    let text: Vec<String> = (0..200).map(|i| format!("t{i}")).collect();
    let v = build_vector(&text.join(" "));
    assert_eq!(v.len(), VECTOR_DIM);
    assert!(v.as_slice().iter().all(|x| (*x - 1.0 / 200.0).abs() < 1e-12));
}

#[test]
fn degenerate_inputs_have_zero_similarity() {
    let a = build_vector("hola");
    let short = TextVector::from_weights(vec![1.0, 0.0]);
    assert_eq!(similarity(&a, &short), 0.0);
    assert_eq!(similarity(&short, &a), 0.0);

    let empty = build_vector("   ");
    assert_eq!(similarity(&a, &empty), 0.0);
    assert_eq!(similarity(&empty, &empty), 0.0);
}

#[test]
fn search_is_bounded_sorted_and_positive() {
    let corpus = Corpus::from_texts([
        "uno dos",
        "tres",
        "cuatro cinco",
        "seis siete ocho nueve",
    ]);
    for k in 0..6 {
        let hits = corpus.search("hola adios", k);
        assert!(hits.len() <= k);
        assert!(hits.iter().all(|h| h.similarity_score > 0.0));
        assert!(hits.windows(2).all(|w| w[0].similarity_score >= w[1].similarity_score));
    }
}

#[test]
fn ties_keep_corpus_order() {
    let corpus = Corpus::from_texts(["uno dos", "tres", "cuatro cinco"]);
    let hits = corpus.search("hola adios", 2);
    let idx: Vec<usize> = hits.iter().map(|h| h.source_index).collect();
    assert_eq!(idx, vec![0, 2]);
    assert_eq!(hits[0].text, "uno dos");
    assert_eq!(hits[0].similarity_score, hits[1].similarity_score);
}

#[test]
fn empty_corpus_returns_nothing() {
    let corpus = Corpus::empty();
    assert!(corpus.search("cualquier cosa", 3).is_empty());
    assert_eq!(corpus.stats().status, "empty");
}

#[test]
fn entries_with_other_dimensions_never_match() {
    let corpus = Corpus::from_entries(vec![CorpusEntry {
        vector: TextVector::from_weights(vec![1.0; 16]),
        text: "mal dimensionado".into(),
        metadata: None,
    }]);
    assert!(corpus.search("hola", 3).is_empty());
}

#[test]
fn load_accepts_both_item_shapes() {
    let dir = tempfile::tempdir().unwrap();
    let emb = dir.path().join("embeddings.json");
    let docs = dir.path().join("documents.json");

    let v1 = build_vector("apoyo emocional");
    let v2 = build_vector("respirar despacio ayuda");
    fs::write(
        &emb,
        serde_json::to_string(&serde_json::json!([v1, { "vector": v2 }])).unwrap(),
    )
    .unwrap();
    fs::write(
        &docs,
        r#"["apoyo emocional", {"text": "respirar despacio ayuda", "metadata": {"source": "guia"}}]"#,
    )
    .unwrap();

    let corpus = Corpus::load(&emb, &docs);
    assert_eq!(corpus.len(), 2);
    assert_eq!(corpus.entries()[1].text, "respirar despacio ayuda");
    assert_eq!(
        corpus.entries()[1].metadata.as_ref().unwrap()["source"],
        "guia"
    );
    let stats = corpus.stats();
    assert_eq!((stats.documents, stats.embeddings, stats.status), (2, 2, "loaded"));

    let hits = corpus.search("respirar despacio ayuda", 1);
    assert_eq!(hits[0].source_index, 1);
}

#[test]
fn misaligned_files_truncate_to_shorter() {
    let dir = tempfile::tempdir().unwrap();
    let emb = dir.path().join("embeddings.json");
    let docs = dir.path().join("documents.json");
    let v = build_vector("a b");
    fs::write(&emb, serde_json::to_string(&vec![v.clone(), v.clone(), v]).unwrap()).unwrap();
    fs::write(&docs, r#"["a b"]"#).unwrap();

    let corpus = Corpus::load(&emb, &docs);
    assert_eq!(corpus.len(), 1);
    assert_eq!(corpus.stats().embeddings, 3);
}

#[test]
fn broken_or_missing_files_degrade_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    let emb = dir.path().join("embeddings.json");
    let docs = dir.path().join("documents.json");

    assert!(Corpus::load(&emb, &docs).is_empty());

    fs::write(&emb, "{ not json").unwrap();
    fs::write(&docs, r#"["x"]"#).unwrap();
    let corpus = Corpus::load(&emb, &docs);
    assert!(corpus.is_empty());
    assert!(corpus.search("x", 3).is_empty());
}
