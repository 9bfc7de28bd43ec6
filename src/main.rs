use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use connection_desk::{
    config::AppConfig,
    lifecycle::Action,
    observability,
    service::{ConnectionService, GeneratedFields},
    store::Store,
    tariff,
};
use rust_decimal::Decimal;

#[derive(Parser)]
#[command(name = "connection-desk")]
#[command(about = "Connection requests and tariff quotes for the utility back office", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Itemise the charge for a number of units using the configured tariff
    Quote {
        units: Decimal,
    },
    /// Apply an action to a connection request
    Transition {
        request_id: u64,
        /// approve, reject, schedule_inspection, create_customer or complete_installation
        action: String,
        /// Payload fields, e.g. employee_id=4 estimated_charges=1500
        fields: Vec<String>,
    },
}

fn main() -> Result<()> {
    observability::init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::load().context("loading configuration")?;

    match cli.command {
        Commands::Quote { units } => quote(config, units),
        Commands::Transition {
            request_id,
            action,
            fields,
        } => transition(config, request_id, &action, &fields),
    }
}

fn quote(config: AppConfig, units: Decimal) -> Result<()> {
    let schedule = config
        .tariff
        .clone()
        .ok_or_else(|| anyhow!("no [tariff] section configured"))?;
    let breakdown = tariff::calculate(units, &schedule)?;
    let charges = breakdown.to_bill_charges();

    for slab in &breakdown.slab_charges {
        println!(
            "slab {:>2}  {:>10} units @ {:>8}  {:>12.2}",
            slab.slab_index, slab.units, slab.rate_per_unit, slab.amount
        );
    }
    println!("energy            {:>12}", charges.base_amount.to_string());
    println!("fixed             {:>12}", charges.fixed_charges.to_string());
    println!("electricity duty  {:>12}", charges.electricity_duty.to_string());
    println!("gst               {:>12}", charges.gst_amount.to_string());
    println!("total             {:>12}", charges.total_amount.to_string());
    Ok(())
}

fn transition(config: AppConfig, request_id: u64, action: &str, fields: &[String]) -> Result<()> {
    let pairs = fields
        .iter()
        .map(|field| {
            field
                .split_once('=')
                .ok_or_else(|| anyhow!("expected key=value, got {field}"))
        })
        .collect::<Result<Vec<_>>>()?;
    let action = Action::parse(action, pairs)?;

    let store = Store::open(&config.storage.path).context("opening store")?;
    let service = ConnectionService::new(store.clone(), config);
    let outcome = match service.apply_transition(request_id, action) {
        Ok(outcome) => outcome,
        Err(err) => {
            return Err(anyhow!(
                "{} ({}, nothing changed: {})",
                err,
                err.kind().as_str(),
                err.nothing_changed()
            ));
        }
    };
    store.flush()?;

    println!(
        "request {} {} -> {}{}",
        outcome.request_id,
        outcome.previous_status,
        outcome.new_status,
        if outcome.replayed { " (already applied)" } else { "" }
    );
    if let Some(id) = outcome.work_order_id {
        println!("work order      {id}");
    }
    match outcome.generated {
        Some(GeneratedFields::Approval {
            account_number,
            temporary_password,
        }) => {
            println!("account number  {account_number}");
            if let Some(password) = temporary_password {
                println!("temp password   {}", password.expose());
            }
        }
        Some(GeneratedFields::Customer {
            customer_id,
            account_number,
            meter_number,
            temporary_password,
            email,
            name,
            bill_id,
        }) => {
            println!("customer        {customer_id} {name} <{email}>");
            println!("account number  {account_number}");
            println!("meter number    {meter_number}");
            if let Some(password) = temporary_password {
                println!("temp password   {}", password.expose());
            }
            if let Some(bill_id) = bill_id {
                println!("connection bill {bill_id}");
            }
        }
        None => {}
    }
    Ok(())
}
