use std::path::PathBuf;

use num::rational::BigRational;
use num::BigInt;
use test_log::test;

use mdp_lra::{
    read_environment_json, read_mdp_json, read_sparse_model, NondeterministicInfiniteHorizonHelper,
    OptimizationDirection, SolverEnvironment, SolverError, SparseModel,
};

fn model_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("models").join(name)
}

fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected.iter()) {
        assert!((a - e).abs() < 1e-5, "{:?} vs {:?}", actual, expected);
    }
}

fn rewards(model: &SparseModel<f64>, env: &SolverEnvironment, dir: OptimizationDirection) -> Vec<f64> {
    let mut helper = NondeterministicInfiniteHorizonHelper::new(&model.transitions);
    helper.set_optimization_direction(dir);
    helper.compute_long_run_average_rewards(env, &model.reward_model()).unwrap()
}

#[test]
fn test_read_json_model() {
    let mdp = read_mdp_json(model_path("two_cycles.json")).unwrap();
    assert_eq!(mdp.states, vec![0, 1, 2, 3]);
    assert!(!mdp.is_markov_automaton());
    assert!(read_mdp_json(model_path("missing.json")).is_err());
}

#[test]
fn test_reward_values_in_both_directions() {
    let model: SparseModel<f64> = read_sparse_model(model_path("two_cycles.json")).unwrap();
    let env = SolverEnvironment::new().with_precision(1e-8);
    assert_close(&rewards(&model, &env, OptimizationDirection::Maximize), &[1.0, 1.0, 1.0, 0.0]);
    assert_close(&rewards(&model, &env, OptimizationDirection::Minimize), &[0.5, 0.5, 1.0, 0.0]);
}

#[test]
fn test_scheduler_names_optimal_actions() {
    let model: SparseModel<f64> = read_sparse_model(model_path("two_cycles.json")).unwrap();
    let mut helper = NondeterministicInfiniteHorizonHelper::new(&model.transitions);
    helper.set_optimization_direction(OptimizationDirection::Minimize);
    helper.set_produce_scheduler(true);
    let values = helper
        .compute_long_run_average_rewards(&SolverEnvironment::new(), &model.reward_model())
        .unwrap();
    let result = helper.result(values).unwrap();
    let choices = result.scheduler.unwrap().deterministic_choices().unwrap();
    let actions: Vec<&str> = choices
        .iter()
        .enumerate()
        .map(|(s, c)| model.action_names[model.transitions.row_group(s).start + c].as_str())
        .collect();
    assert_eq!(actions, vec!["gamble", "rest", "win", "lose"]);
}

#[test]
fn test_label_probabilities() {
    let model: SparseModel<f64> = read_sparse_model(model_path("two_cycles.json")).unwrap();
    let env = SolverEnvironment::new().with_precision(1e-8);
    let mut helper = NondeterministicInfiniteHorizonHelper::new(&model.transitions);
    helper.set_optimization_direction(OptimizationDirection::Maximize);
    let won = helper
        .compute_long_run_average_probabilities(&env, model.labelled_states("won").unwrap())
        .unwrap();
    assert_close(&won, &[0.5, 0.5, 1.0, 0.0]);
    let resting = helper
        .compute_long_run_average_probabilities(&env, model.labelled_states("resting").unwrap())
        .unwrap();
    assert_close(&resting, &[0.5, 0.5, 0.0, 0.0]);
}

#[test]
fn test_exact_values_from_json() {
    let model: SparseModel<BigRational> = read_sparse_model(model_path("two_cycles.json")).unwrap();
    let mut helper = NondeterministicInfiniteHorizonHelper::new(&model.transitions);
    helper.set_optimization_direction(OptimizationDirection::Minimize);
    let values = helper
        .compute_long_run_average_rewards(&SolverEnvironment::new(), &model.reward_model())
        .unwrap();
    let half = BigRational::new(BigInt::from(1), BigInt::from(2));
    let one = BigRational::from_integer(BigInt::from(1));
    let zero = BigRational::from_integer(BigInt::from(0));
    assert_eq!(values, vec![half.clone(), half, one, zero]);
}

#[test]
fn test_markov_automaton_from_json() {
    let model: SparseModel<f64> = read_sparse_model(model_path("busy_server.json")).unwrap();
    assert!(model.is_markov_automaton());
    let (markovian, exit_rates) = (model.markovian.as_ref().unwrap(), model.exit_rates.as_ref().unwrap());
    let busy = model.labelled_states("busy").unwrap();
    let env = SolverEnvironment::new().with_precision(1e-8);

    let mut helper = NondeterministicInfiniteHorizonHelper::new_markov_automaton(&model.transitions, markovian, exit_rates);
    helper.set_optimization_direction(OptimizationDirection::Maximize);
    assert_close(&helper.compute_long_run_average_probabilities(&env, busy).unwrap(), &[2.0 / 3.0; 3]);
    helper.set_optimization_direction(OptimizationDirection::Minimize);
    assert_close(&helper.compute_long_run_average_probabilities(&env, busy).unwrap(), &[0.0; 3]);
}

#[test]
fn test_sound_environment_from_json() {
    let env = read_environment_json(model_path("sound.json")).unwrap();
    assert!(env.force_soundness);
    assert_eq!(env.lra.aperiodic_factor, 0.125);
    let model: SparseModel<f64> = read_sparse_model(model_path("two_cycles.json")).unwrap();
    let values = rewards(&model, &env, OptimizationDirection::Minimize);
    for (v, e) in values.iter().zip([0.5, 0.5, 1.0, 0.0].iter()) {
        assert!((v - e).abs() <= 1e-6);
    }
}

#[test]
fn test_invalid_environment_is_rejected() {
    let model: SparseModel<f64> = read_sparse_model(model_path("two_cycles.json")).unwrap();
    let mut helper = NondeterministicInfiniteHorizonHelper::new(&model.transitions);
    helper.set_optimization_direction(OptimizationDirection::Maximize);
    let env = SolverEnvironment::new().with_precision(0.0);
    assert!(matches!(
        helper.compute_long_run_average_rewards(&env, &model.reward_model()),
        Err(SolverError::InvalidEnvironment(_))
    ));
}
