//! Interactive warehouse chat driven by the function-calling loop.

use crate::agent::{AgentResponse, CapabilityContext, FunctionCallingAgent};
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::{Prompts, Settings};
use crate::llm::OpenAIChatModel;
use crate::session::{ConversationTurn, Session};
use crate::warehouse::BigQueryWarehouse;
use anyhow::Result;
use console::style;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing::debug;

/// Run the sql command.
///
/// With a question, answers it once; otherwise starts a session that reads
/// questions from stdin until `exit`.
pub async fn run_sql(question: Option<String>, settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Sql, &settings) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let agent = build_agent(&settings)?;
    let mut session = Session::new();
    debug!("Started session {}", session.id());

    if let Some(question) = question {
        ask(&agent, &mut session, &question).await?;
        return Ok(());
    }

    println!("\n{}", style("toolpilot SQL").bold().cyan());
    println!(
        "{}\n",
        style("Ask questions about your data, or 'exit' to quit. Use 'history' to review the session.").dim()
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{} ", style("You:").green().bold());
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }

        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            Output::info("Goodbye!");
            break;
        }

        if input.eq_ignore_ascii_case("history") {
            print_history(&session);
            continue;
        }

        if let Err(e) = ask(&agent, &mut session, input).await {
            Output::error(&format!("Error: {}", e));
        }
    }

    Ok(())
}

fn build_agent(settings: &Settings) -> Result<FunctionCallingAgent> {
    let prompts = Prompts::load(
        settings.prompts.custom_dir.as_deref(),
        Some(&settings.prompts.variables),
    )?;
    let tool_timeout = settings.agent.tool_timeout();
    let warehouse = BigQueryWarehouse::from_settings(&settings.warehouse, tool_timeout)?;
    let model = OpenAIChatModel::new(
        &settings.agent.chat_model,
        settings.agent.chat_temperature,
        settings.llm.timeout(),
    )?;

    let tools = CapabilityContext::new(
        Arc::new(warehouse),
        settings.warehouse.max_bytes_billed,
        tool_timeout,
    );

    Ok(FunctionCallingAgent::new(Arc::new(model), tools)
        .with_prompts(prompts.function_calling)
        .with_max_iterations(settings.agent.max_iterations)
        .with_model_timeout(settings.llm.timeout()))
}

async fn ask(agent: &FunctionCallingAgent, session: &mut Session, question: &str) -> Result<()> {
    session.push_user(question);

    let spinner = Output::spinner("Querying the warehouse...");
    let mut trace = Vec::new();
    let response = agent.run_with_trace(question, &mut trace).await;
    spinner.finish_and_clear();

    let AgentResponse {
        content,
        tool_calls,
        iterations,
    } = match response {
        Ok(response) => response,
        Err(e) => {
            for call in &trace {
                Output::call_trace(&call.to_string(), call.is_error());
            }
            return Err(e.into());
        }
    };
    debug!("Answered in {} iteration(s)", iterations);

    for call in &tool_calls {
        Output::call_trace(&call.to_string(), call.is_error());
    }
    println!("\n{} {}\n", style("Assistant:").cyan().bold(), content);

    let turn = session.push_assistant(&content, tool_calls);
    if let Some(trace) = turn.trace_markdown() {
        Output::header("Function calls, parameters, and responses");
        println!("{}", trace);
    }
    Ok(())
}

fn print_history(session: &Session) {
    if session.is_empty() {
        Output::info("No questions asked yet.");
        return;
    }
    Output::header(&format!("Session {}", session.id()));
    for turn in session.turns() {
        print_turn(turn);
    }
}

fn print_turn(turn: &ConversationTurn) {
    let label = format!("{:?}", turn.role);
    println!(
        "{} {} {}",
        style(turn.created_at.format("%H:%M:%S")).dim(),
        style(label).bold(),
        turn.content
    );
    for call in &turn.tool_calls {
        Output::call_trace(&call.to_string(), call.is_error());
    }
}
