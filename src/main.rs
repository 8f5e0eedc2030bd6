use external_task_client::config::ClientConfig;
use external_task_client::task::{ExternalTask, TaskService, handler_fn};
use external_task_client::{ClientBuilder, ExponentialBackoff};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ClientConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export ENGINE_URL=http://localhost:8080/engine-rest");
        std::process::exit(1);
    });

    let topics: Vec<String> = std::env::var("WORKER_TOPICS")
        .unwrap_or_else(|_| "default".to_string())
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    eprintln!("⚙️  Task worker v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Engine: {}", config.base_url);
    eprintln!("   Topics: {}", topics.join(", "));
    eprintln!("   Press Ctrl-C to stop.\n");

    let client = ClientBuilder::from_config(config)
        .backoff_strategy(ExponentialBackoff::default())
        .build()?;

    for topic in &topics {
        client
            .subscribe(topic.clone())
            .handler(handler_fn(|task: ExternalTask, service: TaskService| async move {
                tracing::info!(
                    task_id = %task.id,
                    topic = %task.topic_name,
                    business_key = ?task.business_key,
                    variables = task.get_all_variables_typed().len(),
                    "Completing task"
                );
                service.complete(&task).await?;
                Ok(())
            }))
            .open()?;
    }

    tracing::info!(worker_id = %client.worker_id(), "Worker running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    client.stop().await;

    Ok(())
}
