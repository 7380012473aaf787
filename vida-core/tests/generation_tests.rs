use chrono::Utc;

use vida_core::config::GenerationConfig;
use vida_core::services::context::GlobalContextItem;
use vida_core::services::generation::{
    DEFAULT_SYSTEM_PROMPT, GenerationError, GenerationRequest, Generator, HttpGenerator,
};

fn item(chat_name: &str, text: &str) -> GlobalContextItem {
    GlobalContextItem {
        chat_id: "c".into(),
        chat_name: chat_name.into(),
        message_id: "m".into(),
        text: text.into(),
        is_user: true,
        timestamp: Utc::now(),
    }
}

#[test]
fn bare_request_is_just_the_user_text() {
    let req = GenerationRequest { user_text: "Tengo miedo".into(), ..Default::default() };
    assert_eq!(req.user_content(), "Tengo miedo");
}

#[test]
fn retrieval_and_history_are_appended_under_headers() {
    let req = GenerationRequest {
        system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
        user_text: "Tengo miedo".into(),
        retrieval_texts: vec!["Es normal sentir miedo.".into(), "Respira despacio.".into()],
        global_context: vec![item("Familia", "me preocupa mi madre"), item("  ", "sin nombre")],
    };
    assert_eq!(
        req.user_content(),
        "Tengo miedo\
         \n\nContexto relevante (RAG):\n- Es normal sentir miedo.\n- Respira despacio.\
         \n\nContexto de conversaciones anteriores:\n[Familia]: me preocupa mi madre\n[Chat anterior]: sin nombre"
    );
}

#[test]
fn disabled_generation_refuses_without_network() {
    let cfg = GenerationConfig { enabled: false, ..Default::default() };
    let generator = HttpGenerator::with_api_key(cfg, Some("sk-test".into())).unwrap();
    let err = generator.generate(&GenerationRequest::default()).unwrap_err();
    assert!(matches!(err, GenerationError::Disabled));
}

#[test]
fn direct_mode_requires_a_key() {
    let cfg = GenerationConfig { api_key_env: "VIDA_TEST_NO_SUCH_KEY".into(), ..Default::default() };
    let generator = HttpGenerator::with_api_key(cfg, None).unwrap();
    let err = generator
        .generate(&GenerationRequest { user_text: "hola".into(), ..Default::default() })
        .unwrap_err();
    match err {
        GenerationError::MissingApiKey(var) => assert_eq!(var, "VIDA_TEST_NO_SUCH_KEY"),
        other => panic!("unexpected error: {other}"),
    }
}
