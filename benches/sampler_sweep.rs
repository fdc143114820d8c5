use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use slipper::basis::{basis_for_series, initial_coefficients};
use slipper::bayes::{Hyperparameters, log_posterior};
use slipper::config::{Hyperpriors, SamplerConfig, SplineConfig};
use slipper::fourier;
use slipper::sampler::{AdaptiveSampler, InitialState};
use slipper::simulate;
use slipper::spline_model::SplineMixtureModel;

fn setup(n: usize, k: usize) -> (SplineMixtureModel, ndarray::Array1<f64>, f64) {
    let series = fourier::standardize(simulate::ar4_series(n, 0x5EED).view()).series;
    let pdgrm = fourier::periodogram(series.view());
    let spline = SplineConfig {
        k,
        ..SplineConfig::default()
    };
    let basis = basis_for_series(pdgrm.view(), &spline).expect("basis");
    let model = SplineMixtureModel::new(basis.densities, basis.penalty).expect("model");
    (model, pdgrm, fourier::variance(series.view()))
}

fn benchmark_log_posterior(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_posterior");
    for &(n, k) in &[(256_usize, 16_usize), (1024, 32), (4096, 32)] {
        let (model, pdgrm, _) = setup(n, k);
        let v = initial_coefficients(pdgrm.view(), k);
        let hyper = Hyperparameters {
            phi: 1.0,
            delta: 1.0,
            tau: 0.2,
        };
        let priors = Hyperpriors::default();
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("n", n), &n, |b, _| {
            b.iter(|| {
                let lp = log_posterior(
                    black_box(v.view()),
                    &hyper,
                    &priors,
                    black_box(pdgrm.view()),
                    &model,
                );
                black_box(lp.ok());
            });
        });
    }
    group.finish();
}

fn benchmark_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("sampler_sweep");
    group.sample_size(20);
    for &(n, k) in &[(256_usize, 16_usize), (1024, 32)] {
        let (model, pdgrm, variance) = setup(n, k);
        let config = SamplerConfig {
            n_steps: 11,
            burnin: 0,
            ..SamplerConfig::default()
        };
        group.throughput(Throughput::Elements(10 * (k as u64 - 1)));
        group.bench_with_input(BenchmarkId::new("k", k), &k, |b, &k| {
            b.iter(|| {
                let v0 = initial_coefficients(pdgrm.view(), k);
                let initial = InitialState::from_priors(v0, variance, &config.hyperpriors);
                let mut sampler =
                    AdaptiveSampler::new(model.clone(), pdgrm.clone(), &config).expect("sampler");
                sampler.initialize(initial).expect("initialize");
                sampler.run().expect("run");
                black_box(sampler.into_chain());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_log_posterior, benchmark_sweep);
criterion_main!(benches);
