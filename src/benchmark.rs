use criterion::measurement::WallTime;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;

use mdp_lra::model_checking::mdp::{random_mdp, random_transition_matrix};
use mdp_lra::{
    IterativeMinMaxSolver, MinMaxMethod, NondeterministicInfiniteHorizonHelper, OptimizationDirection,
    SolverEnvironment, SparseMatrixBuilder, SparseModel,
};

#[derive(Clone, Copy)]
enum Size {
    SMALL,
    MEDIUM,
    LARGE,
}

fn states(size: &Size) -> usize {
    match size {
        Size::SMALL => 50,
        Size::MEDIUM => 200,
        Size::LARGE => 1000,
    }
}

fn setup(size: Size) -> SparseModel<f64> {
    let mut rng = StdRng::seed_from_u64(1234);
    let mdp = random_mdp(&mut rng, states(&size), 4, 4);
    match mdp.to_sparse() {
        Ok(model) => model,
        Err(e) => panic!("generated model is invalid: {}", e),
    }
}

pub fn minmax_benchmark(c: &mut Criterion) -> &mut Criterion<WallTime> {
    let mut rng = StdRng::seed_from_u64(42);
    let n = states(&Size::MEDIUM);
    let random = random_transition_matrix(&mut rng, n, 4, 4);
    // every choice leaves with probability 0.1, so the fixed point is unique
    let mut builder = SparseMatrixBuilder::new();
    for state in 0..n {
        builder.new_row_group();
        for row in random.row_group(state) {
            builder.add_row(random.row(row).iter().map(|e| (e.column, 0.9 * e.value)));
        }
    }
    let matrix = builder.build(n);
    let b: Vec<f64> = (0..matrix.row_count()).map(|r| (r % 7) as f64 / 7.0).collect();
    let env = SolverEnvironment::new().with_precision(1e-4);

    for method in [MinMaxMethod::ValueIteration, MinMaxMethod::PolicyIteration].iter() {
        let env = env.clone().with_minmax_method(*method);
        c.bench_function(&format!("minmax {:?}", method), |bench| {
            bench.iter(|| {
                let mut solver = IterativeMinMaxSolver::new(matrix.clone());
                solver.set_has_unique_solution(true);
                let mut x = vec![0.0; n];
                black_box(solver.solve_equations(&env, OptimizationDirection::Minimize, &mut x, &b).ok());
                x
            })
        });
    }
    c
}

pub fn lra_benchmark(c: &mut Criterion) -> &mut Criterion<WallTime> {
    let env = SolverEnvironment::new();
    for (name, size) in [("small", Size::SMALL), ("medium", Size::MEDIUM), ("large", Size::LARGE)].iter() {
        let model = setup(*size);
        let rewards = model.reward_model();
        c.bench_function(&format!("lra {}", name), |bench| {
            bench.iter(|| {
                let mut helper = NondeterministicInfiniteHorizonHelper::new(&model.transitions);
                helper.set_optimization_direction(OptimizationDirection::Maximize);
                helper.set_produce_scheduler(true);
                black_box(helper.compute_long_run_average_rewards(&env, &rewards).ok())
            })
        });
    }
    c
}

criterion_group!(benches, minmax_benchmark, lra_benchmark);
criterion_main!(benches);
