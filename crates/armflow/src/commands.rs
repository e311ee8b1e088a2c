use crate::InvocationArgs;
use anyhow::Context;
use armflow_azure::{ArmClient, ArmConfig, StaticToken};
use armflow_cloud::{
    Completion, DriftRecord, FileStateStore, LifecycleEngine, LroDriver, NameResolver, PullStep,
    ResourceDeclaration, RetrySignal, Step,
};
use armflow_config::ArmflowConfig;
use std::path::Path;
use std::sync::Arc;

/// Result of one lifecycle invocation
#[derive(Debug)]
pub enum Outcome {
    Completed {
        operation: &'static str,
        completion: Completion,
    },
    Drift(DriftRecord),
    RetryLater {
        operation: &'static str,
        signal: RetrySignal,
    },
}

impl Outcome {
    fn from_step(operation: &'static str, step: Step) -> Self {
        match step {
            Step::Completed(completion) => Outcome::Completed {
                operation,
                completion,
            },
            Step::RetryLater(signal) => Outcome::RetryLater { operation, signal },
        }
    }
}

/// Everything one invocation needs
struct Session {
    engine: LifecycleEngine,
    client: ArmClient,
    store: FileStateStore,
}

fn open_session(instance: &str) -> anyhow::Result<Session> {
    let config = ArmflowConfig::load()?;
    let subscription = config
        .subscription()
        .context("サブスクリプションIDが設定されていません")?;

    let credentials = StaticToken::from_env()?;
    let client = ArmClient::new(
        ArmConfig::new(subscription).with_api_base(config.api_base.clone()),
        Arc::new(credentials),
    )?;
    let store = FileStateStore::new(config.state_dir(), instance)?;
    let engine = LifecycleEngine::new(
        LroDriver::new(config.poll_interval()),
        NameResolver::new(config.name_attempts),
    )
    .with_what_if_budget(config.what_if_budget());

    tracing::debug!(
        "Session for instance {} (state in {})",
        instance,
        config.state_dir().display()
    );

    Ok(Session {
        engine,
        client,
        store,
    })
}

fn load_declaration(path: &Path) -> anyhow::Result<ResourceDeclaration> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("宣言ファイルを読み込めません: {}", path.display()))?;
    let declaration: ResourceDeclaration = serde_yaml::from_str(&content)
        .with_context(|| format!("宣言ファイルの解析に失敗しました: {}", path.display()))?;
    Ok(declaration)
}

pub async fn create(args: &InvocationArgs) -> anyhow::Result<Outcome> {
    let declaration = load_declaration(&args.declaration)?;
    let session = open_session(&args.instance)?;
    let step = session
        .engine
        .create(&session.client, &session.store, &declaration)
        .await?;
    Ok(Outcome::from_step("create", step))
}

pub async fn update(args: &InvocationArgs) -> anyhow::Result<Outcome> {
    let declaration = load_declaration(&args.declaration)?;
    let session = open_session(&args.instance)?;
    let step = session
        .engine
        .update(&session.client, &session.store, &declaration)
        .await?;
    Ok(Outcome::from_step("update", step))
}

pub async fn delete(instance: &str) -> anyhow::Result<Outcome> {
    let session = open_session(instance)?;
    let step = session.engine.delete(&session.client, &session.store).await?;
    Ok(Outcome::from_step("delete", step))
}

pub async fn pull(args: &InvocationArgs) -> anyhow::Result<Outcome> {
    let declaration = load_declaration(&args.declaration)?;
    let session = open_session(&args.instance)?;
    let step = session
        .engine
        .pull(&session.client, &session.store, &declaration)
        .await?;
    Ok(match step {
        PullStep::Drift(record) => Outcome::Drift(record),
        PullStep::RetryLater(signal) => Outcome::RetryLater {
            operation: "pull",
            signal,
        },
    })
}
