use atomgrad::NetError;
use atomgrad::config::TrainingConfig;
use atomgrad::data::Dataset;
use atomgrad::functions::Loss;
use atomgrad::init::RandomSampler;
use atomgrad::layers::{Activation, LayerGraph};
use atomgrad::network::NeuralNetwork;
use atomgrad::train::{LogReporter, Report, Trainer};

fn classifier() -> NeuralNetwork {
    let mut graph = LayerGraph::new();
    let input = graph.add_layer(2, Activation::Relu).unwrap();
    let hidden = graph.add_layer(3, Activation::Relu).unwrap();
    let output = graph.add_layer(2, Activation::Softmax).unwrap();
    graph.connect_dense(input, hidden).unwrap();
    graph.connect_dense(hidden, output).unwrap();
    graph.connect_dense(input, output).unwrap();
    NeuralNetwork::new(graph, input, output, Loss::cross_entropy(), 0.1).unwrap()
}

fn two_classes() -> Dataset {
    Dataset::from_labels(
        vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![0.9, 0.1],
            vec![0.2, 0.8],
        ],
        &[0, 1, 0, 1],
        2,
    )
    .unwrap()
}

#[test]
fn fitting_reduces_the_loss() {
    let config = TrainingConfig::default()
        .with_learning_rate(0.5)
        .with_batch_size(2)
        .with_report_every(1);
    let data = two_classes();
    let mut net = classifier();
    let trainer = Trainer::new(config.with_epochs(1));
    trainer.initialize(&mut net, &mut RandomSampler::seeded(5)).unwrap();

    let first = trainer.fit(&mut net, &data, &mut ()).unwrap();
    let last = Trainer::new(config.with_epochs(200))
        .fit(&mut net, &data, &mut LogReporter)
        .unwrap();

    assert!(last.last_epoch.average_loss() < first.last_epoch.average_loss());
    assert!(last.last_epoch.average_loss() < 0.2);
    assert_eq!(last.last_epoch.accuracy(), 1.0);
}

#[test]
fn trailing_partial_batches_are_skipped() {
    let data = Dataset::from_labels(
        vec![vec![1.0, 0.0]; 5],
        &[0, 0, 0, 0, 0],
        2,
    )
    .unwrap();
    let config = TrainingConfig::default()
        .with_batch_size(2)
        .with_epochs(3)
        .with_report_every(1);
    let mut net = classifier();
    let mut reports: Vec<Report> = Vec::new();
    let trainer = Trainer::new(config);
    trainer.initialize(&mut net, &mut RandomSampler::seeded(9)).unwrap();
    let summary = trainer.fit(&mut net, &data, &mut reports).unwrap();

    assert_eq!(summary.epochs, 3);
    assert_eq!(summary.steps, 6);
    assert_eq!(summary.last_epoch.examples, 4);
    assert_eq!(reports.len(), 6);
    assert_eq!(
        reports.iter().map(|r| (r.epoch, r.step)).collect::<Vec<_>>(),
        vec![(0, 1), (0, 2), (1, 1), (1, 2), (2, 1), (2, 2)]
    );
}

#[test]
fn a_dataset_exactly_one_batch_long_still_trains() {
    let data = two_classes();
    let mut net = classifier();
    let trainer = Trainer::new(TrainingConfig::default().with_batch_size(4).with_epochs(1));
    trainer.initialize(&mut net, &mut RandomSampler::seeded(1)).unwrap();
    let summary = trainer.fit(&mut net, &data, &mut ()).unwrap();
    assert_eq!(summary.steps, 1);
}

#[test]
fn reports_average_over_the_window() {
    let data = two_classes();
    let mut net = classifier();
    let config = TrainingConfig::default()
        .with_batch_size(1)
        .with_epochs(1)
        .with_report_every(2);
    let trainer = Trainer::new(config);
    trainer.initialize(&mut net, &mut RandomSampler::seeded(2)).unwrap();
    let mut reports: Vec<Report> = Vec::new();
    trainer.fit(&mut net, &data, &mut reports).unwrap();

    assert_eq!(reports.len(), 2);
    for report in &reports {
        assert!(report.average_loss > 0.0);
        assert!((0.0..=1.0).contains(&report.accuracy));
    }
}

#[test]
fn invalid_configuration_is_reported_before_training() {
    let data = two_classes();
    let mut net = classifier();
    let trainer = Trainer::new(TrainingConfig::default().with_report_every(0));
    assert!(matches!(
        trainer.fit(&mut net, &data, &mut ()),
        Err(NetError::InvalidConfig { .. })
    ));
}

#[test]
fn dataset_shapes_must_fit_the_network() {
    let data = Dataset::new(vec![vec![1.0, 2.0, 3.0]], vec![vec![1.0, 0.0]]).unwrap();
    let mut net = classifier();
    let trainer = Trainer::new(TrainingConfig::default().with_batch_size(1));
    assert_eq!(
        trainer.fit(&mut net, &data, &mut ()),
        Err(NetError::ShapeMismatch {
            what: "dataset input",
            expected: 2,
            got: 3
        })
    );
}

#[test]
fn train_batch_past_the_end_fails() {
    let data = two_classes();
    let mut net = classifier();
    let trainer = Trainer::new(TrainingConfig::default().with_batch_size(2));
    trainer.initialize(&mut net, &mut RandomSampler::seeded(4)).unwrap();
    assert!(trainer.train_batch(&mut net, &data, 0).is_ok());
    assert!(matches!(
        trainer.train_batch(&mut net, &data, 3),
        Err(NetError::InvalidDataset { .. })
    ));
}
