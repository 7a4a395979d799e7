use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keda_reconciler::config::ControllerConfig;
use keda_reconciler::controller::{Controller, Reconciler, Trigger};
use keda_reconciler::manifest::{ManifestModel, TemplateSource, EMBEDDED_CONTROLLER};
use keda_reconciler::models::{KedaController, ManifestObject, KEDA_CONTROLLER_KIND};
use keda_reconciler::pipeline::Pipeline;
use keda_reconciler::scheme::Scheme;
use keda_reconciler::store::{MemoryStore, ResourceStore};
use keda_reconciler::transform::{self, Attribute};

#[derive(Parser)]
#[command(name = "keda-reconciler")]
#[command(about = "Render and converge KEDA controller manifests")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Inputs {
    /// Component manifest (defaults to KEDA_TEMPLATE_PATH, then the embedded one)
    #[arg(short, long)]
    template: Option<PathBuf>,

    /// KedaController resource (defaults to the embedded sample)
    #[arg(short, long)]
    controller: Option<PathBuf>,

    /// Attribute change applied before rendering, as name=value
    #[arg(short = 'a', long = "set", value_name = "NAME=VALUE")]
    changes: Vec<String>,

    /// Correlation tag stamped by the attribute changes
    #[arg(short, long, default_value = "cli")]
    marker: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the rendered component manifest
    Render {
        #[command(flatten)]
        inputs: Inputs,
    },
    /// Print the KedaController after one attribute change
    Set {
        /// KedaController resource (defaults to the embedded sample)
        #[arg(short, long)]
        controller: Option<PathBuf>,

        /// Attribute name, see `attributes`
        attribute: String,

        value: String,

        #[arg(short, long, default_value = "cli")]
        marker: String,
    },
    /// Reconcile against an in-memory store and print the result
    Reconcile {
        #[command(flatten)]
        inputs: Inputs,

        /// Install namespace (overrides KEDA_INSTALL_NAMESPACE)
        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// List the supported attributes and their current values
    Attributes {
        /// KedaController resource (defaults to the embedded sample)
        #[arg(short, long)]
        controller: Option<PathBuf>,
    },
}

/// Initialize tracing with output to stderr so rendered YAML owns stdout
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "keda_reconciler=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn controller_source(path: Option<PathBuf>) -> TemplateSource {
    match path {
        Some(path) => TemplateSource::File(path),
        None => TemplateSource::Inline(EMBEDDED_CONTROLLER.to_string()),
    }
}

fn load_controller(scheme: &Scheme, source: &TemplateSource) -> anyhow::Result<KedaController> {
    let model = ManifestModel::load(scheme, source)?;
    let object = model
        .iter()
        .find(|o| o.kind == KEDA_CONTROLLER_KIND)
        .cloned()
        .with_context(|| format!("no {} in {}", KEDA_CONTROLLER_KIND, source))?;
    KedaController::try_from(object)
        .map_err(|o| anyhow::anyhow!("{} {} has no controller body", o.kind, o.metadata.name))
}

fn apply_changes(controller: &mut KedaController, changes: &[String], marker: &str) -> anyhow::Result<()> {
    for change in changes {
        let (name, value) = change
            .split_once('=')
            .with_context(|| format!("expected NAME=VALUE, got {:?}", change))?;
        transform::apply(controller, name, value, marker)?;
    }
    Ok(())
}

fn config_for(inputs: &Inputs) -> ControllerConfig {
    let config = ControllerConfig::from_env();
    match &inputs.template {
        Some(path) => config.with_template(TemplateSource::File(path.clone())),
        None => config,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let scheme = Arc::new(Scheme::default());

    match cli.command {
        Commands::Render { inputs } => {
            let config = config_for(&inputs);
            let mut controller = load_controller(&scheme, &controller_source(inputs.controller))?;
            apply_changes(&mut controller, &inputs.changes, &inputs.marker)?;

            let manifest = ManifestModel::load(&scheme, &config.template)?;
            let rendered = Pipeline::new(scheme.clone()).render(&manifest, &controller)?;
            print!("{}", rendered.to_yaml()?);
        }
        Commands::Set {
            controller,
            attribute,
            value,
            marker,
        } => {
            let source = controller_source(controller);
            let model = ManifestModel::load(&scheme, &source)?;
            let changed = Pipeline::new(scheme.clone()).change_attribute(&model, &attribute, &value, &marker)?;
            print!("{}", changed.to_yaml()?);
        }
        Commands::Reconcile { inputs, namespace } => {
            let mut config = config_for(&inputs);
            if let Some(namespace) = namespace {
                config = config.with_install_namespace(namespace);
            }
            let mut resource = load_controller(&scheme, &controller_source(inputs.controller))?;
            apply_changes(&mut resource, &inputs.changes, &inputs.marker)?;

            let store = Arc::new(MemoryStore::new());
            let created = store.create(ManifestObject::from(resource)).await?;
            let key = created.key();
            tracing::info!("Reconciling {}", key);

            let controller = Controller::new(Reconciler::new(store.clone(), scheme.clone(), config));
            if let Trigger::Started(handle) = controller.trigger(key.clone()) {
                handle.await?;
            }

            let live = store.get(&key).await?;
            let status = KedaController::try_from(live)
                .ok()
                .and_then(|c| c.status);
            match status {
                Some(status) => eprintln!(
                    "{}: {}{}",
                    key,
                    status.phase.as_str(),
                    status.reason.map(|r| format!(" ({})", r)).unwrap_or_default()
                ),
                None => eprintln!("{}: no status recorded", key),
            }

            let objects = ManifestModel::new(store.snapshot())?;
            print!("{}", objects.to_yaml()?);
        }
        Commands::Attributes { controller } => {
            let controller = load_controller(&scheme, &controller_source(controller))?;
            for attribute in Attribute::ALL {
                println!("{:<28} {:?}", attribute.name(), attribute.read(&controller));
            }
        }
    }

    Ok(())
}
