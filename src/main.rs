//! FTL REPL - Interactive fuzzy tensor logic workbench.

use candle_core::{Device, Tensor};
use ftlogic::signature::SignatureBuilder;
use ftlogic::structure::{embedding, TableFunctor};
use ftlogic::{
    default_device, parse_with, Assignment, FtlError, KbAggregation, KnowledgeBase, Model,
    OperatorConfig, OperatorSet, ParserConfig, Result, Signature, Structure, TablePredicate,
    TrainConfig,
};
use indexmap::IndexMap;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Settings loaded with `:config <file.json>`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SessionConfig {
    operators: OperatorConfig,
    aggregation: KbAggregation,
    train: TrainConfig,
}

enum TableDef {
    Fixed(Vec<f32>),
    Learnable,
}

/// Declarations typed so far, and the model built from them.
struct Session {
    device: Device,
    signature: SignatureBuilder,
    domains: IndexMap<String, usize>,
    tables: IndexMap<String, TableDef>,
    maps: IndexMap<String, Vec<f32>>,
    constants: IndexMap<String, f32>,
    formulas: Vec<(String, f64)>,
    syntax: ParserConfig,
    config: SessionConfig,
    model: Option<Model>,
}

impl Session {
    fn new() -> Self {
        Self {
            device: default_device(),
            signature: SignatureBuilder::default(),
            domains: IndexMap::new(),
            tables: IndexMap::new(),
            maps: IndexMap::new(),
            constants: IndexMap::new(),
            formulas: Vec::new(),
            syntax: ParserConfig::standard(),
            config: SessionConfig::default(),
            model: None,
        }
    }

    fn declare(&mut self, f: impl FnOnce(SignatureBuilder) -> SignatureBuilder) {
        self.signature = f(std::mem::take(&mut self.signature));
        self.model = None;
    }

    fn signature(&self) -> Result<Signature> {
        self.signature.clone().build()
    }

    fn model(&self) -> Result<&Model> {
        self.model
            .as_ref()
            .ok_or_else(|| FtlError::Usage("nothing compiled yet; use :compile".to_string()))
    }

    fn model_mut(&mut self) -> Result<&mut Model> {
        self.model
            .as_mut()
            .ok_or_else(|| FtlError::Usage("nothing compiled yet; use :compile".to_string()))
    }

    /// Table shape for a symbol over `sorts`: one axis per argument.
    fn shape(&self, sorts: &[ftlogic::Sort]) -> Result<Vec<usize>> {
        sorts
            .iter()
            .map(|sort| {
                self.domains.get(sort.name()).copied().ok_or_else(|| {
                    FtlError::Usage(format!("sort `{}` has no domain; use :domain", sort))
                })
            })
            .collect()
    }

    fn compile(&mut self) -> Result<()> {
        let sig = Arc::new(self.signature()?);
        let mut structure = Structure::new(sig.clone(), &self.device);

        for (sort, &n) in &self.domains {
            structure.set_domain(sort, embedding::index_domain(n, &self.device)?)?;
        }
        for (name, def) in &self.tables {
            let sorts = sig
                .predicate(name)
                .ok_or_else(|| FtlError::Usage(format!("`{}` is not a predicate", name)))?;
            let shape = self.shape(sorts)?;
            let predicate = match def {
                TableDef::Fixed(values) => {
                    TablePredicate::fixed(table(values, &shape, &self.device)?)?
                }
                TableDef::Learnable => TablePredicate::learnable(&shape, &self.device)?,
            };
            structure.set_predicate(name, predicate)?;
        }
        for (name, values) in &self.maps {
            let decl = sig
                .functor(name)
                .ok_or_else(|| FtlError::Usage(format!("`{}` is not a functor", name)))?;
            let shape = self.shape(&decl.args)?;
            structure.set_functor(name, TableFunctor::new(table(values, &shape, &self.device)?)?)?;
        }
        for (name, &value) in &self.constants {
            structure.set_constant(name, Tensor::new(value, &self.device)?)?;
        }

        let operators = OperatorSet::from_config(&self.config.operators)?;
        let mut kb = KnowledgeBase::with_structure(Arc::new(structure), Arc::new(operators))
            .with_aggregation(self.config.aggregation)
            .with_parser(self.syntax.clone());
        for (text, weight) in &self.formulas {
            kb.add_formula(text, *weight)?;
        }
        let mut model = Model::new(kb, self.config.train.clone())?;
        model.compile()?;
        self.model = Some(model);
        Ok(())
    }
}

fn table(values: &[f32], shape: &[usize], device: &Device) -> Result<Tensor> {
    let expected: usize = shape.iter().product();
    if values.len() != expected {
        return Err(FtlError::Usage(format!(
            "table of shape {:?} needs {} values, got {}",
            shape,
            expected,
            values.len()
        )));
    }
    Ok(Tensor::from_vec(values.to_vec(), shape, device)?)
}

fn parse_values(parts: &[&str]) -> Result<Vec<f32>> {
    parts
        .iter()
        .map(|p| {
            p.parse::<f32>()
                .map_err(|_| FtlError::Usage(format!("`{}` is not a number", p)))
        })
        .collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().collect();
    let mut session = Session::new();

    // If a file argument is provided, execute it
    if args.len() > 1 {
        let file_path = &args[1];
        if let Err(e) = load_file(file_path, &mut session) {
            eprintln!("Error loading {}: {}", file_path, e);
            std::process::exit(1);
        }
        println!("Executed: {}", file_path);

        // If --repl flag is passed, continue to REPL after executing file
        if args.len() > 2 && args[2] == "--repl" {
            return run_repl(session);
        }
        print_state(&session);
        return Ok(());
    }

    println!("FTL v0.1.0 - fuzzy tensor logic");
    println!("Type :help for commands, :quit to exit\n");

    run_repl(session)
}

fn run_repl(mut session: Session) -> Result<()> {
    let mut rl = DefaultEditor::new()
        .map_err(|e| FtlError::Usage(format!("failed to create editor: {}", e)))?;

    loop {
        match rl.readline("ftl> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);

                match handle_line(trimmed, &mut session) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("Error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Bye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}

/// Handle one REPL line. Returns false if the REPL should exit.
fn handle_line(line: &str, session: &mut Session) -> Result<bool> {
    if line.starts_with(':') {
        handle_command(line, session)
    } else {
        let truth = session.model()?.evaluate(line, &Assignment::new())?;
        print_tensor(line, &truth);
        Ok(true)
    }
}

/// Handle REPL commands (starting with :)
fn handle_command(cmd: &str, session: &mut Session) -> Result<bool> {
    let parts: Vec<&str> = cmd.split_whitespace().collect();
    let command = parts[0];
    let args = &parts[1..];

    match command {
        ":quit" | ":q" | ":exit" => {
            println!("Bye!");
            return Ok(false);
        }

        ":help" | ":h" | ":?" => print_help(),

        ":sort" => {
            let [name] = args else {
                return Err(usage(":sort <Name>"));
            };
            session.declare(|sig| sig.sort(name));
        }

        ":pred" => {
            let Some((name, sorts)) = args.split_first() else {
                return Err(usage(":pred <Name> [Sort..]"));
            };
            session.declare(|sig| sig.predicate(name, sorts));
        }

        ":func" => {
            // :func succ D -> D
            let Some((name, rest)) = args.split_first() else {
                return Err(usage(":func <name> [Sort..] -> <Sort>"));
            };
            let (sorts, result) = match rest {
                [sorts @ .., "->", result] => (sorts, *result),
                _ => return Err(usage(":func <name> [Sort..] -> <Sort>")),
            };
            session.declare(|sig| sig.functor(name, sorts, result));
        }

        ":const" => {
            let [name, sort, value] = args else {
                return Err(usage(":const <name> <Sort> <element>"));
            };
            let value = parse_values(&[*value])?[0];
            session.declare(|sig| sig.constant(name, sort));
            session.constants.insert(name.to_string(), value);
        }

        ":domain" => {
            let [sort, size] = args else {
                return Err(usage(":domain <Sort> <size>"));
            };
            let size = size
                .parse::<usize>()
                .map_err(|_| FtlError::Usage(format!("`{}` is not a size", size)))?;
            session.domains.insert(sort.to_string(), size);
            session.model = None;
        }

        ":table" => {
            let Some((name, values)) = args.split_first() else {
                return Err(usage(":table <Predicate> <truth values, row-major>"));
            };
            let values = parse_values(values)?;
            session.tables.insert(name.to_string(), TableDef::Fixed(values));
            session.model = None;
        }

        ":learn" => {
            let [name] = args else {
                return Err(usage(":learn <Predicate>"));
            };
            session.tables.insert(name.to_string(), TableDef::Learnable);
            session.model = None;
        }

        ":map" => {
            let Some((name, values)) = args.split_first() else {
                return Err(usage(":map <functor> <result elements, row-major>"));
            };
            let values = parse_values(values)?;
            session.maps.insert(name.to_string(), values);
            session.model = None;
        }

        ":formula" | ":f" => {
            // :formula [w=2.0] forall x. P(x)
            let (weight, text) = match args.first().and_then(|a| a.strip_prefix("w=")) {
                Some(w) => (
                    w.parse::<f64>()
                        .map_err(|_| FtlError::Usage(format!("`{}` is not a weight", w)))?,
                    args[1..].join(" "),
                ),
                None => (1.0, args.join(" ")),
            };
            if text.is_empty() {
                return Err(usage(":formula [w=F] <formula>"));
            }
            session.formulas.push((text, weight));
            session.model = None;
        }

        ":compile" | ":c" => {
            session.compile()?;
            println!("Compiled {} formula(s)", session.formulas.len());
        }

        ":train" => {
            // :train epochs=100 lr=0.01 optimizer=adamw
            let config = train_options(args, &session.config.train)?;
            if session.model.is_none() {
                session.compile()?;
            }
            let model = session.model_mut()?;
            if &config != model.config() {
                model.set_config(config)?;
            }
            let history = model.train(&mut Vec::<Assignment>::new())?;
            match (history.loss.last(), history.satisfaction.last()) {
                (Some(loss), Some(sat)) => println!(
                    "Training complete ({:?}) after {} epochs. Final loss: {:.6}, satisfaction: {:.6}",
                    model.state(),
                    history.epochs(),
                    loss,
                    sat
                ),
                _ => println!("No epochs run"),
            }
        }

        ":reset" => {
            session.model_mut()?.reset()?;
            println!("Optimizer state and history cleared");
        }

        ":kb" => {
            let model = session.model()?;
            let truth = model.predict(&[])?.to_vec1::<f32>()?;
            for (entry, t) in model.knowledge_base().iter().zip(truth) {
                println!("  [{:.4}] w={} {}", t, entry.weight(), entry.source());
            }
            let sat = model.knowledge_base().satisfaction(&[])?;
            print_tensor("satisfaction", &sat);
        }

        ":tree" | ":t" => {
            let text = args.join(" ");
            let formula = parse_with(&text, &session.signature()?, &session.syntax)?;
            println!("{}", formula);
            println!("{:#?}", formula);
        }

        ":syntax" => {
            session.syntax = match args {
                ["standard"] => ParserConfig::standard(),
                ["compact"] => ParserConfig::compact(),
                _ => return Err(usage(":syntax standard|compact")),
            };
            session.model = None;
            println!("Formulas are now read in {} syntax", args[0]);
        }

        ":config" => {
            let [path] = args else {
                return Err(usage(":config <file.json>"));
            };
            let contents = fs::read_to_string(path)?;
            let config: SessionConfig =
                serde_json::from_str(&contents).map_err(|e| FtlError::Config(e.to_string()))?;
            config.train.validate()?;
            OperatorSet::from_config(&config.operators)?;
            session.config = config;
            session.model = None;
            println!("Loaded config from {}", path);
        }

        ":save" => {
            let [path] = args else {
                return Err(usage(":save <path.safetensors>"));
            };
            session
                .model()?
                .knowledge_base()
                .interpretation()
                .structure()
                .save_trainable(path)?;
            println!("Saved parameters to {}", path);
        }

        ":restore" => {
            let [path] = args else {
                return Err(usage(":restore <path.safetensors>"));
            };
            session
                .model()?
                .knowledge_base()
                .interpretation()
                .structure()
                .load_trainable(path)?;
            println!("Restored parameters from {}", path);
        }

        ":load" | ":l" => {
            let [path] = args else {
                return Err(usage(":load <file.ftl>"));
            };
            load_file(path, session).map_err(FtlError::Usage)?;
            println!("Loaded: {}", path);
        }

        _ => println!("Unknown command: {}. Type :help for help.", command),
    }

    Ok(true)
}

/// Apply `key=value` training options on top of `base`.
fn train_options(args: &[&str], base: &TrainConfig) -> Result<TrainConfig> {
    let mut config = base.clone();
    for part in args {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| FtlError::Usage(format!("expected key=value, got `{}`", part)))?;
        match key {
            "epochs" => {
                config.epochs = value
                    .parse()
                    .map_err(|_| FtlError::Usage(format!("`{}` is not an epoch count", value)))?
            }
            "lr" => {
                config.learning_rate = value
                    .parse()
                    .map_err(|_| FtlError::Usage(format!("`{}` is not a learning rate", value)))?
            }
            "optimizer" => {
                config.optimizer =
                    serde_json::from_value(serde_json::Value::String(value.to_string()))
                        .map_err(|e| FtlError::Config(e.to_string()))?
            }
            _ => {
                return Err(FtlError::Usage(format!(
                    "unknown training option `{}` (epochs, lr, optimizer)",
                    key
                )))
            }
        }
    }
    config.validate()?;
    Ok(config)
}

fn usage(form: &str) -> FtlError {
    FtlError::Usage(format!("usage: {}", form))
}

fn print_help() {
    println!(
        r#"FTL Commands:
  :help, :h, :?              Show this help
  :quit, :q                  Exit the REPL
  :load <file>               Run a script of commands and queries

Signature:
  :sort <Name>               Declare a sort
  :pred <Name> [Sort..]      Declare a predicate
  :func <name> [Sort..] -> S Declare a functor
  :const <name> <Sort> <i>   Declare a constant denoting element i

Structure:
  :domain <Sort> <n>         Domain {{0, .., n-1}}
  :table <Pred> <v..>        Fixed truth table (row-major)
  :learn <Pred>              Learnable truth table
  :map <func> <i..>          Functor lookup table (row-major)

Knowledge base:
  :formula [w=F] <formula>   Add a weighted formula
  :compile, :c               Build the model
  :train [epochs=N] [lr=F] [optimizer=sgd|adamw]
  :reset                     Clear optimizer state and history
  :kb                        Show formula truth degrees
  :syntax standard|compact   Formula syntax for :formula, :tree and queries
  :config <file.json>        Load operators/aggregation/train settings
  :save <path>               Save trainable parameters
  :restore <path>            Load trainable parameters

Formulas:
  forall x: D. P(x) -> exists y. R(x, y)
  !A & B | C <-> D           (not, and, or, iff; also ~ ∧ ∨ → ↔ ∀ ∃)
  Ax~D: (P(x) -: Ey~D: R(x, y))   compact syntax: , and  ; or  -: implies  ! not
  <formula>                  Query the compiled model

Command line:
  ftl                        Start interactive REPL
  ftl <file.ftl>             Execute file and show results
  ftl <file.ftl> --repl      Execute file then start REPL
"#
    );
}

/// Load and execute a script: one command or query per line.
fn load_file(path: &str, session: &mut Session) -> std::result::Result<(), String> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(format!("File not found: {}", path.display()));
    }
    let contents = fs::read_to_string(path).map_err(|e| format!("Failed to read file: {}", e))?;

    for (line_num, line) in contents.lines().enumerate() {
        let trimmed = line.trim();
        // Skip empty lines and comments
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
            continue;
        }
        match handle_line(trimmed, session) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => return Err(format!("Line {}: {}", line_num + 1, e)),
        }
    }
    Ok(())
}

/// Pretty-print a truth tensor with its values
fn print_tensor(name: &str, t: &Tensor) {
    let dims = t.dims();
    print!("{} : {:?} = ", name, dims);

    match dims.len() {
        0 => match t.to_scalar::<f32>() {
            Ok(v) => println!("{:.4}", v),
            Err(_) => println!("{:?}", t),
        },
        1 => match t.to_vec1::<f32>() {
            Ok(v) => {
                let formatted: Vec<String> = v.iter().map(|x| format!("{:.4}", x)).collect();
                println!("[{}]", formatted.join(", "));
            }
            Err(_) => println!("{:?}", t),
        },
        _ => println!("{:?}", t),
    }
}

fn print_state(session: &Session) {
    println!("\n=== State ===");
    match session.signature() {
        Ok(sig) => {
            println!("Sorts: {}", sig.sorts().map(|s| s.to_string()).collect::<Vec<_>>().join(", "));
            println!(
                "Predicates: {}",
                sig.predicates().map(|(name, _)| name).collect::<Vec<_>>().join(", ")
            );
        }
        Err(e) => println!("Signature: {}", e),
    }
    println!("Formulas: {}", session.formulas.len());
    if let Some(model) = &session.model {
        println!("Model: {:?}", model.state());
        if let Ok(truth) = model.predict(&[]) {
            print_tensor("truth", &truth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftlogic::OptimizerType;

    #[test]
    fn test_train_options() {
        let base = TrainConfig::default();
        let config = train_options(&["epochs=5", "lr=0.5", "optimizer=sgd"], &base).unwrap();
        assert_eq!(config.epochs, 5);
        assert_eq!(config.learning_rate, 0.5);
        assert_eq!(config.optimizer, OptimizerType::Sgd);
        let config = train_options(&["optimizer=adamw"], &config).unwrap();
        assert_eq!(config.optimizer, OptimizerType::AdamW);
        assert_eq!(train_options(&[], &base).unwrap(), base);
    }

    #[test]
    fn test_bad_train_options_are_errors() {
        let base = TrainConfig::default();
        for args in [
            &["epochs=abc"][..],
            &["lr=xyz"],
            &["epochs=-3"],
            &["speed=9"],
            &["epochs"],
        ] {
            assert!(
                matches!(train_options(args, &base), Err(FtlError::Usage(_))),
                "{:?}",
                args
            );
        }
        assert!(matches!(train_options(&["lr=0"], &base), Err(FtlError::Config(_))));
        assert!(matches!(train_options(&["optimizer=lbfgs"], &base), Err(FtlError::Config(_))));
    }
}
