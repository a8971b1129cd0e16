// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Command-line front end for the questionnaire engine
//!
//! Loads a questionnaire (and optionally a response), commits answers given on the
//! command line and prints the resulting state as JSON.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use octofhir_questionnaire::engine::answer_from_input;
use octofhir_questionnaire::{
    FhirPathEvaluator, ItemChange, Questionnaire, QuestionnaireResponse,
    QuestionnaireResponseItem, QuestionnaireSession, SessionConfig, StaticTerminologyClient,
    TerminologyClient,
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

#[derive(Parser)]
#[command(name = "octofhir-questionnaire")]
#[command(about = "Evaluate FHIR questionnaire rules against a response")]
#[command(version)]
#[command(author = "OctoFHIR Team <funyloony@gmail.com>")]
struct Cli {
    /// Log engine activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON session configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Resolve answerValueSet urls against the configured terminology server
    #[arg(long, global = true)]
    online: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply answers and print the response with visibility and calculated values
    Render {
        /// Questionnaire JSON file
        #[arg(short, long)]
        questionnaire: PathBuf,
        /// Prior QuestionnaireResponse JSON file
        #[arg(short, long)]
        response: Option<PathBuf>,
        /// Answer to commit, as linkId=value; repeat for more answers
        #[arg(short = 's', long = "set", value_name = "LINK_ID=VALUE")]
        answers: Vec<String>,
        /// Pretty-print the output
        #[arg(short, long)]
        pretty: bool,
    },
    /// Print the response without hidden and unanswered items
    Clean {
        /// Questionnaire JSON file
        #[arg(short, long)]
        questionnaire: PathBuf,
        /// QuestionnaireResponse JSON file
        #[arg(short, long)]
        response: PathBuf,
        /// Pretty-print the output
        #[arg(short, long)]
        pretty: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    human_panic::setup_panic!();

    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match &cli.config {
        Some(path) => SessionConfig::from_json(
            &fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        )?,
        None => SessionConfig::default(),
    };

    match cli.command {
        Commands::Render {
            questionnaire,
            response,
            answers,
            pretty,
        } => {
            let mut session =
                open_session(config, cli.online, &questionnaire, response.as_deref()).await?;
            for (link_id, raw_values) in parse_assignments(&answers)? {
                commit(&mut session, &link_id, &raw_values).await?;
            }
            let output = json!({
                "response": session.updatable_response(),
                "visibility": session.visibility(),
                "calculatedValues": session.calculated_values(),
                "tabs": session.tabs(),
            });
            print_json(&output, pretty)
        }
        Commands::Clean {
            questionnaire,
            response,
            pretty,
        } => {
            let session =
                open_session(config, cli.online, &questionnaire, Some(&response)).await?;
            print_json(&serde_json::to_value(session.clean_response())?, pretty)
        }
    }
}

async fn open_session(
    config: SessionConfig,
    online: bool,
    questionnaire: &Path,
    response: Option<&Path>,
) -> Result<QuestionnaireSession> {
    let questionnaire: Questionnaire = read_json(questionnaire)?;
    let response: Option<QuestionnaireResponse> = response.map(read_json).transpose()?;

    let mut session = if online {
        QuestionnaireSession::from_config(config)?
    } else {
        let terminology: Arc<dyn TerminologyClient> = Arc::new(StaticTerminologyClient::new());
        let evaluator = Arc::new(FhirPathEvaluator::with_cache_capacity(
            config.expression_cache_size,
        ));
        QuestionnaireSession::new(config, evaluator, terminology)?
    };
    session
        .build_source_questionnaire(questionnaire, response, IndexMap::new())
        .await;
    Ok(session)
}

/// Group `linkId=value` arguments by linkId, keeping command-line order
fn parse_assignments(assignments: &[String]) -> Result<IndexMap<String, Vec<String>>> {
    let mut grouped: IndexMap<String, Vec<String>> = IndexMap::new();
    for assignment in assignments {
        let Some((link_id, value)) = assignment.split_once('=') else {
            bail!("expected LINK_ID=VALUE, got '{assignment}'");
        };
        grouped
            .entry(link_id.trim().to_string())
            .or_default()
            .push(value.to_string());
    }
    Ok(grouped)
}

async fn commit(
    session: &mut QuestionnaireSession,
    link_id: &str,
    raw_values: &[String],
) -> Result<()> {
    let Some(item) = session.source_questionnaire().find_item(link_id).cloned() else {
        bail!("questionnaire has no item '{link_id}'");
    };

    let codings = match session.model().value_set_urls.get(link_id).cloned() {
        Some(url) => session.resolve_value_set(&url).await.unwrap_or_else(|error| {
            log::warn!("answers of '{link_id}' cannot use value set {url}: {error}");
            Vec::new()
        }),
        None => Vec::new(),
    };

    let mut answers = Vec::with_capacity(raw_values.len());
    for raw in raw_values {
        match answer_from_input(&item, raw, &codings) {
            Some(answer) => answers.push(answer),
            None => bail!("'{raw}' is not a valid answer for '{link_id}' ({:?})", item.item_type),
        }
    }
    if answers.len() > 1 && !item.is_repeating() {
        bail!("'{link_id}' does not repeat but got {} answers", answers.len());
    }

    let item = QuestionnaireResponseItem::from_definition(&item).with_answers(answers);
    if !session.commit_answer(ItemChange::Item(item)) {
        bail!("answer for '{link_id}' could not be committed");
    }
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn print_json(value: &Value, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}
