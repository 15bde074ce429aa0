// Fits y = 3x + z - 2 with SGD, validating on held-out samples after every
// epoch. Run with RUST_LOG=info (or debug) to see the epoch summaries.

use candle::{DType, Device, Result, Tensor, D};
use candle_fit::{
    CandleOptimizer, ConsoleLogger, FitOptions, FnMetric, Model, ModelCheckpoint, Monitor,
    Runner, RunnerConfig, TensorBatches,
};
use candle_nn::{Linear, Module, VarBuilder, VarMap, SGD};
use tracing_subscriber::EnvFilter;

const TRAIN_SAMPLES: usize = 512;
const VAL_SAMPLES: usize = 128;
const BATCH_SIZE: usize = 32;

struct Regressor {
    fc: Linear,
}

impl Regressor {
    fn new(vs: VarBuilder) -> Result<Self> {
        let fc = candle_nn::linear(2, 1, vs.pp("fc"))?;
        Ok(Self { fc })
    }
}

impl Model for Regressor {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.fc.forward(xs)
    }
}

fn samples(n: usize, dev: &Device) -> Result<(Tensor, Tensor)> {
    let xs = Tensor::randn(0f32, 1.0, (n, 2), dev)?;
    let w = Tensor::new(&[[3f32], [1.]], dev)?;
    let noise = Tensor::randn(0f32, 0.05, (n, 1), dev)?;
    let ys = (xs.matmul(&w)? + noise)?.affine(1.0, -2.0)?;
    Ok((xs, ys))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let dev = Device::cuda_if_available(0)?;
    println!("Using device: {:?}", dev);

    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
    let model = Regressor::new(vs)?;
    let optimizer = CandleOptimizer::<SGD>::new(varmap.all_vars(), 0.05)?;

    let (train_x, train_y) = samples(TRAIN_SAMPLES, &dev)?;
    let (val_x, val_y) = samples(VAL_SAMPLES, &dev)?;
    let train = TensorBatches::new(train_x, train_y, BATCH_SIZE)?.shuffle(true);
    let val = TensorBatches::new(val_x, val_y, BATCH_SIZE)?;

    let checkpoint_dir = std::env::temp_dir().join("candle-fit-linear-regression");
    let mut runner = Runner::builder(model, optimizer, candle_nn::loss::mse)
        .metric(FnMetric::new("mae", |out: &Tensor, target: &Tensor| {
            out.sub(target)?.abs()?.mean_all()
        }))
        .metric(FnMetric::new("max_err", |out: &Tensor, target: &Tensor| {
            out.sub(target)?.abs()?.flatten_all()?.max(D::Minus1)
        }))
        .callback(ConsoleLogger::new())
        .callback(
            ModelCheckpoint::new(varmap.clone(), &checkpoint_dir)
                .monitor(Monitor::ValMetric("mae".to_string())),
        )
        .config(RunnerConfig::new().device(dev.clone()))
        .build();

    runner.fit(&train, FitOptions::new().epochs(10).validation(&val))?;

    let (loss, metrics) = runner.evaluate(&val, None)?;
    println!("final val loss {loss:.5}, mae {:.4}, max_err {:.4}", metrics[0], metrics[1]);
    for (name, var) in varmap.data().lock().map_err(|e| anyhow::anyhow!("{e}"))?.iter() {
        println!("{name}: {}", var.as_tensor());
    }
    println!("best checkpoint in {}", checkpoint_dir.display());
    Ok(())
}
