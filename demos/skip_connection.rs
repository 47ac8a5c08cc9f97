use atomgrad::config::TrainingConfig;
use atomgrad::data::{Dataset, argmax};
use atomgrad::functions::{ActivationFn, Loss};
use atomgrad::init::RandomSampler;
use atomgrad::layers::{Activation, LayerGraph};
use atomgrad::network::NeuralNetwork;
use atomgrad::train::{Report, Reporter, Trainer};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

struct Stdout;

impl Reporter for Stdout {
    fn report(&mut self, report: &Report) {
        println!(
            "epoch {:>2} step {:>3}: loss={:.4}, acc={:.1}%",
            report.epoch,
            report.step,
            report.average_loss,
            report.accuracy * 100.0
        );
    }
}

/// Points in `[-1, 1]^2` labelled by quadrant.
fn quadrants(rng: &mut StdRng, count: usize) -> atomgrad::Result<Dataset> {
    let mut inputs = Vec::with_capacity(count);
    let mut labels = Vec::with_capacity(count);
    for _ in 0..count {
        let (x, y): (f64, f64) = (rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0));
        labels.push(usize::from(x < 0.0) * 2 + usize::from(y < 0.0));
        inputs.push(vec![x, y]);
    }
    Dataset::from_labels(inputs, &labels, 4)
}

fn main() -> atomgrad::Result<()> {
    let mut rng = StdRng::seed_from_u64(2024);
    let train = quadrants(&mut rng, 2048)?;
    let test = quadrants(&mut rng, 256)?;

    let mut graph = LayerGraph::new();
    let input = graph.add_layer(2, Activation::Relu)?;
    let h0 = graph.add_layer(16, Activation::Relu)?;
    let h1 = graph.add_layer(8, Activation::Custom(ActivationFn::sigmoid()))?;
    let output = graph.add_layer(4, Activation::Softmax)?;
    graph.connect_dense(input, h0)?;
    graph.connect_dense(h0, h1)?;
    graph.connect_dense(h1, output)?;
    graph.connect_dense(h0, output)?;

    let config = TrainingConfig::default()
        .with_learning_rate(0.05)
        .with_batch_size(16)
        .with_epochs(10)
        .with_report_every(32);
    let trainer = Trainer::new(config);

    let mut net = NeuralNetwork::new(graph, input, output, Loss::cross_entropy(), config.learning_rate)?;
    trainer.initialize(&mut net, &mut RandomSampler::seeded(7))?;

    println!("Beginning training...");
    let summary = trainer.fit(&mut net, &train, &mut Stdout)?;
    println!(
        "trained {} epochs / {} batches, last epoch loss={:.4}",
        summary.epochs,
        summary.steps,
        summary.last_epoch.average_loss()
    );

    let mut correct = 0;
    for (x, y) in test.iter() {
        if argmax(net.forward(x)?) == argmax(y) {
            correct += 1;
        }
    }
    println!(
        "TESTING: acc={:.1}%",
        100.0 * f64::from(correct) / test.len() as f64
    );
    Ok(())
}
