mod support;

use pipeline_engine::recipe::{Component, Output, Recipe, Variable};
use pipeline_engine::{Engine, EngineConfig, Error, NoSecrets};
use serde_json::json;
use std::sync::Arc;
use support::{EchoOperator, FlakyOperator, InstantWorkflowRuntime, UppercaseConnector};

fn passthrough_recipe() -> Recipe {
    Recipe {
        variable: vec![Variable {
            name: "x".to_string(),
            instill_format: "string".to_string(),
            accept_formats: vec![],
            default: None,
            listen: vec![],
        }],
        output: vec![Output {
            name: "y".to_string(),
            value: "${variable.x}".to_string(),
        }],
        component: vec![],
        on: None,
    }
}

#[tokio::test]
async fn s1_minimal_pass_through() {
    let engine = Arc::new(Engine::new(EngineConfig::default(), None).await.unwrap());
    let recipe = passthrough_recipe();
    let (outputs, _metadata) = engine
        .trigger_by_id(
            recipe,
            vec![json!({"x": "hello"})],
            "trig-s1".to_string(),
            "users/u1",
            &NoSecrets,
            false,
        )
        .await
        .unwrap();
    assert_eq!(outputs, vec![json!({"y": "hello"})]);
}

#[tokio::test]
async fn s2_two_stage_with_connector_style_operator() {
    let engine = Arc::new(Engine::new(EngineConfig::default(), None).await.unwrap());
    engine.registry().register_operator("echo", Arc::new(EchoOperator));

    let recipe = Recipe {
        variable: vec![Variable {
            name: "q".to_string(),
            instill_format: "string".to_string(),
            accept_formats: vec![],
            default: None,
            listen: vec![],
        }],
        output: vec![Output {
            name: "r".to_string(),
            value: "${c1.result}".to_string(),
        }],
        component: vec![Component {
            id: "c1".to_string(),
            definition_name: "operator-definitions/echo".to_string(),
            configuration: json!({"result": "${variable.q}"}),
            condition: None,
            on_error: None,
        }],
        on: None,
    };

    let (outputs, _metadata) = engine
        .trigger_by_id(
            recipe,
            vec![json!({"q": "a"}), json!({"q": "b"})],
            "trig-s2".to_string(),
            "users/u1",
            &NoSecrets,
            false,
        )
        .await
        .unwrap();
    assert_eq!(outputs, vec![json!({"r": "a"}), json!({"r": "b"})]);
}

#[tokio::test]
async fn s3_array_fan_in_through_full_engine() {
    let engine = Arc::new(Engine::new(EngineConfig::default(), None).await.unwrap());
    engine.registry().register_operator("echo", Arc::new(EchoOperator));

    let recipe = Recipe {
        variable: vec![
            Variable {
                name: "a".to_string(),
                instill_format: "integer".to_string(),
                accept_formats: vec![],
                default: None,
                listen: vec![],
            },
            Variable {
                name: "b".to_string(),
                instill_format: "integer".to_string(),
                accept_formats: vec![],
                default: None,
                listen: vec![],
            },
        ],
        output: vec![Output {
            name: "sum".to_string(),
            value: "${c3.sum}".to_string(),
        }],
        component: vec![
            Component {
                id: "c1".to_string(),
                definition_name: "operator-definitions/echo".to_string(),
                configuration: json!({"n": "${variable.a}"}),
                condition: None,
                on_error: None,
            },
            Component {
                id: "c2".to_string(),
                definition_name: "operator-definitions/echo".to_string(),
                configuration: json!({"n": "${variable.b}"}),
                condition: None,
                on_error: None,
            },
            Component {
                id: "c3".to_string(),
                definition_name: "operator-definitions/echo".to_string(),
                configuration: json!({"sum": "${[c1.n, c2.n]}"}),
                condition: None,
                on_error: None,
            },
        ],
        on: None,
    };

    let (outputs, _metadata) = engine
        .trigger_by_id(
            recipe,
            vec![json!({"a": 1, "b": 2})],
            "trig-s3".to_string(),
            "users/u1",
            &NoSecrets,
            false,
        )
        .await
        .unwrap();
    assert_eq!(outputs, vec![json!({"sum": [1, 2]})]);
}

#[tokio::test]
async fn s4_validation_failure() {
    let engine = Arc::new(Engine::new(EngineConfig::default(), None).await.unwrap());
    let recipe = Recipe {
        variable: vec![Variable {
            name: "age".to_string(),
            instill_format: "integer".to_string(),
            accept_formats: vec![],
            default: None,
            listen: vec![],
        }],
        output: vec![],
        component: vec![],
        on: None,
    };
    let err = engine
        .trigger_by_id(
            recipe,
            vec![json!({"age": "not-a-number"})],
            "trig-s4".to_string(),
            "users/u1",
            &NoSecrets,
            false,
        )
        .await
        .unwrap_err();
    match err {
        Error::Validation(msg) => assert!(msg.contains("inputs[0]/age")),
        other => panic!("expected Validation, got {other:?}"),
    }
}

#[tokio::test]
async fn s5_streaming_through_full_engine() {
    let engine = Arc::new(Engine::new(EngineConfig::default(), None).await.unwrap());
    let recipe = passthrough_recipe();
    let (sink, stream_rx) = flume::unbounded();

    engine
        .trigger_by_id_with_stream(recipe, vec![json!({"x": "hi"})], "trig-s5".to_string(), "users/u1", &NoSecrets, sink)
        .await
        .unwrap();

    let final_result = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            let result = stream_rx.recv_async().await.expect("stream closed before completion");
            if result.component_id.is_none() && result.error.is_none() {
                return result;
            }
        }
    })
    .await
    .expect("streaming completion within timeout");

    assert_eq!(final_result.outputs, vec![json!({"y": "hi"})]);
}

#[tokio::test]
async fn s6_cycle_rejected_before_workflow_starts() {
    let engine = Arc::new(Engine::new(EngineConfig::default(), None).await.unwrap());
    let recipe = Recipe {
        variable: vec![],
        output: vec![],
        component: vec![
            Component {
                id: "c1".to_string(),
                definition_name: "operator-definitions/echo".to_string(),
                configuration: json!({"v": "${c2.out}"}),
                condition: None,
                on_error: None,
            },
            Component {
                id: "c2".to_string(),
                definition_name: "operator-definitions/echo".to_string(),
                configuration: json!({"v": "${c1.out}"}),
                condition: None,
                on_error: None,
            },
        ],
        on: None,
    };
    let err = engine
        .trigger_by_id(recipe, vec![json!({})], "trig-s6".to_string(), "users/u1", &NoSecrets, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRecipe(_)));
}

/// Exercises `Engine::with_runtime`: an activity that fails twice then succeeds still
/// produces the right output once the configured attempt ceiling covers it.
#[tokio::test]
async fn retrying_activity_recovers_within_attempt_ceiling() {
    let mut config = EngineConfig::default();
    config.activity_max_attempts = 3;
    let engine = Arc::new(
        Engine::new(config, None)
            .await
            .unwrap()
            .with_runtime(Arc::new(InstantWorkflowRuntime)),
    );
    engine.registry().register_operator("flaky", Arc::new(FlakyOperator::new(2)));

    let recipe = Recipe {
        variable: vec![Variable {
            name: "q".to_string(),
            instill_format: "string".to_string(),
            accept_formats: vec![],
            default: None,
            listen: vec![],
        }],
        output: vec![Output {
            name: "r".to_string(),
            value: "${c1.result}".to_string(),
        }],
        component: vec![Component {
            id: "c1".to_string(),
            definition_name: "operator-definitions/flaky".to_string(),
            configuration: json!({"result": "${variable.q}"}),
            condition: None,
            on_error: None,
        }],
        on: None,
    };

    let (outputs, _metadata) = engine
        .trigger_by_id(recipe, vec![json!({"q": "ok"})], "trig-retry".to_string(), "users/u1", &NoSecrets, false)
        .await
        .unwrap();
    assert_eq!(outputs, vec![json!({"r": "ok"})]);
}

/// Exercises the batched-connector dispatch path in `execute_component`: one
/// `UppercaseConnector::execute` call covers the whole active batch.
#[tokio::test]
async fn connector_dispatch_covers_whole_batch() {
    let engine = Arc::new(Engine::new(EngineConfig::default(), None).await.unwrap());
    engine
        .registry()
        .register_connector("uppercase", Arc::new(UppercaseConnector));

    let recipe = Recipe {
        variable: vec![Variable {
            name: "text".to_string(),
            instill_format: "string".to_string(),
            accept_formats: vec![],
            default: None,
            listen: vec![],
        }],
        output: vec![Output {
            name: "shouted".to_string(),
            value: "${c1}".to_string(),
        }],
        component: vec![Component {
            id: "c1".to_string(),
            definition_name: "connector-definitions/uppercase".to_string(),
            configuration: json!({"text": "${variable.text}"}),
            condition: None,
            on_error: None,
        }],
        on: None,
    };

    let (outputs, _metadata) = engine
        .trigger_by_id(
            recipe,
            vec![json!({"text": "a"}), json!({"text": "b"})],
            "trig-connector".to_string(),
            "users/u1",
            &NoSecrets,
            false,
        )
        .await
        .unwrap();
    assert_eq!(outputs, vec![json!({"shouted": "A"}), json!({"shouted": "B"})]);
}
