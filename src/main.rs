use std::error::Error;
use std::io;

use clap::clap_app;
use log::{info, LevelFilter};
use num::rational::BigRational;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use mdp_lra::{
    read_environment_json, read_sparse_model, NondeterministicInfiniteHorizonHelper, OptimizationDirection,
    SolverEnvironment, SolverValue, SparseModel,
};

fn main() {
    let matches = clap_app!(mdp_lra =>
        (version: "0.1")
        (author: "tmrob <tmr463@uowmail.edu.au>")
        (@subcommand lra =>
            (about: "Optimal long-run average rewards of an MDP or Markov automaton")
            (@arg MODEL: -m --model <PATH> "Model, takes a json file in the form of transitions e.g.
            {
              \"states\": [0,1],
              \"initial\": 0,
              \"transitions\":
               [{
                  \"s\": 0,
                  \"a\": \"a\",
                  \"s_prime\": [{\"s\": 0,\"p\": 0.5},{\"s\": 1,\"p\": 0.5}],
                  \"rewards\": 1
               },...],
              \"labelling\": [{\"s\": 1, \"w\": \"goal\"}],
              \"markovian\": [0],
              \"exit_rates\": [{\"s\": 0, \"v\": 2.0}],
              \"state_rewards\": [{\"s\": 1, \"v\": 1.0}]
            }
           ")
            (@arg CONFIG: -c --config [PATH] "Solver environment as json")
            (@arg LABEL: -l --label [LABEL] "Long-run fraction of time in states with this label instead of rewards")
            (@arg MIN: --min conflicts_with[MAX] "Minimise (default)")
            (@arg MAX: --max "Maximise")
            (@arg EXACT: -e --exact "Compute with exact rational arithmetic")
            (@arg SCHEDULER: -s --scheduler "Also output an optimal choice per state")
            (@arg OUT: -o --out [PATH] "Write the csv to this file instead of stdout")
            (@arg VERBOSE: -v --verbose [VERBOSITY] default_value("0") "Level of verbosity \
            0 - warnings\
            1 - info
            2 - debug
            3 - trace
            ")
        )
    ).get_matches();

    let f = match matches.subcommand() {
        ("lra", Some(f)) => f,
        (_, _) => {
            println!("{}", matches.usage());
            return;
        }
    };

    let verbose: u32 = f.value_of("VERBOSE").and_then(|v| v.parse().ok()).unwrap_or(0);
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if let Err(e) = TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto) {
        eprintln!("Error: {}", e);
    }

    let options = Options {
        model: f.value_of("MODEL").unwrap_or_default().to_string(),
        config: f.value_of("CONFIG").map(|c| c.to_string()),
        label: f.value_of("LABEL").map(|l| l.to_string()),
        direction: if f.is_present("MAX") {
            OptimizationDirection::Maximize
        } else {
            OptimizationDirection::Minimize
        },
        scheduler: f.is_present("SCHEDULER"),
        out: f.value_of("OUT").map(|o| o.to_string()),
    };

    let result = if f.is_present("EXACT") {
        run::<BigRational>(&options)
    } else {
        run::<f64>(&options)
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

struct Options {
    model: String,
    config: Option<String>,
    label: Option<String>,
    direction: OptimizationDirection,
    scheduler: bool,
    out: Option<String>,
}

fn run<V: SolverValue>(options: &Options) -> Result<(), Box<dyn Error>> {
    let env = match &options.config {
        Some(path) => read_environment_json(path)?,
        None => SolverEnvironment::new(),
    };
    let model: SparseModel<V> = read_sparse_model(&options.model)?;
    info!(
        "Loaded {} with {} states and {} choices.",
        if model.is_markov_automaton() { "Markov automaton" } else { "MDP" },
        model.number_of_states(),
        model.transitions.row_count()
    );

    let mut helper = match (&model.markovian, &model.exit_rates) {
        (Some(markovian), Some(exit_rates)) => {
            NondeterministicInfiniteHorizonHelper::new_markov_automaton(&model.transitions, markovian, exit_rates)
        }
        _ => NondeterministicInfiniteHorizonHelper::new(&model.transitions),
    };
    helper.set_optimization_direction(options.direction);
    helper.set_produce_scheduler(options.scheduler);
    let values = match &options.label {
        Some(label) => helper.compute_long_run_average_probabilities(&env, model.labelled_states(label)?)?,
        None => helper.compute_long_run_average_rewards(&env, &model.reward_model())?,
    };
    let result = helper.result(values)?;
    let choices = result.scheduler.as_ref().and_then(|s| s.deterministic_choices());

    let writer: Box<dyn io::Write> = match &options.out {
        Some(path) => Box::new(std::fs::File::create(path)?),
        None => Box::new(io::stdout()),
    };
    let mut wtr = csv::Writer::from_writer(writer);
    if choices.is_some() {
        wtr.write_record(&["state", "value", "choice"])?;
    } else {
        wtr.write_record(&["state", "value"])?;
    }
    for (i, value) in result.values.iter().enumerate() {
        let state = model.state_ids[i].to_string();
        let value = value.to_string();
        match &choices {
            Some(choices) => {
                let first_row = model.transitions.row_group(i).start;
                let action = &model.action_names[first_row + choices[i]];
                wtr.write_record(&[state.as_str(), value.as_str(), action.as_str()])?;
            }
            None => wtr.write_record(&[state.as_str(), value.as_str()])?,
        }
    }
    wtr.flush()?;
    Ok(())
}
