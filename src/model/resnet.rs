use burn::{
    nn::{
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, PaddingConfig3d, Relu,
        conv::{Conv2d, Conv2dConfig, Conv3d, Conv3dConfig},
    },
    prelude::*,
    tensor::activation::softmax,
};

use super::blocks::{Residual2d, Residual3d, ResidualConfig};
use super::{Dimensionality, NetworkSpec, TaskModel};

/// Stem convolution, three strided residual stages, global average pooling and a linear head.
#[derive(Module, Debug)]
pub struct Classifier2d<B: Backend> {
    stem: Conv2d<B>,
    stage_1: Residual2d<B>,
    stage_2: Residual2d<B>,
    stage_3: Residual2d<B>,
    activation: Relu,
    dropout: Dropout,
    head: Linear<B>,
}

impl<B: Backend> Classifier2d<B> {
    /// Class logits `[batch, num_classes]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.stem.forward(images));
        let x = self.stage_1.forward(x);
        let x = self.stage_2.forward(x);
        let x = self.stage_3.forward(x);

        // Global pooling: [B, C, H, W] -> [B, C]
        let [batch_size, channels, _, _] = x.dims();
        let x = x.mean_dim(3).mean_dim(2).reshape([batch_size, channels]);

        self.head.forward(self.dropout.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct Classifier3d<B: Backend> {
    stem: Conv3d<B>,
    stage_1: Residual3d<B>,
    stage_2: Residual3d<B>,
    stage_3: Residual3d<B>,
    activation: Relu,
    dropout: Dropout,
    head: Linear<B>,
}

impl<B: Backend> Classifier3d<B> {
    pub fn forward(&self, volumes: Tensor<B, 5>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.stem.forward(volumes));
        let x = self.stage_1.forward(x);
        let x = self.stage_2.forward(x);
        let x = self.stage_3.forward(x);

        let [batch_size, channels, _, _, _] = x.dims();
        let x = x
            .mean_dim(4)
            .mean_dim(3)
            .mean_dim(2)
            .reshape([batch_size, channels]);

        self.head.forward(self.dropout.forward(x))
    }
}

#[derive(Config, Debug)]
pub struct ClassifierConfig {
    input_channels: usize,
    num_classes: usize,
    #[config(default = "32")]
    base_filters: usize,
    #[config(default = "0.1")]
    dropout: f64,
}

impl ClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Classifier2d<B> {
        let base = self.base_filters;

        Classifier2d {
            stem: Conv2dConfig::new([self.input_channels, base], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            stage_1: ResidualConfig::new(base, base).init_2d(device),
            stage_2: ResidualConfig::new(base, base * 2).init_2d(device),
            stage_3: ResidualConfig::new(base * 2, base * 4).init_2d(device),
            activation: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
            head: LinearConfig::new(base * 4, self.num_classes).init(device),
        }
    }

    pub fn init_3d<B: Backend>(&self, device: &B::Device) -> Classifier3d<B> {
        let base = self.base_filters;

        Classifier3d {
            stem: Conv3dConfig::new([self.input_channels, base], [3, 3, 3])
                .with_padding(PaddingConfig3d::Same)
                .init(device),
            stage_1: ResidualConfig::new(base, base).init_3d(device),
            stage_2: ResidualConfig::new(base, base * 2).init_3d(device),
            stage_3: ResidualConfig::new(base * 2, base * 4).init_3d(device),
            activation: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
            head: LinearConfig::new(base * 4, self.num_classes).init(device),
        }
    }
}

#[derive(Module, Debug)]
pub enum ClassifierBackbone<B: Backend> {
    Planar(Classifier2d<B>),
    Volumetric(Classifier3d<B>),
}

/// Softmax classifier over a 2D or 3D residual network.
#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    backbone: ClassifierBackbone<B>,
    num_classes: usize,
    base_filters: usize,
}

impl<B: Backend> Classifier<B> {
    pub fn build(spec: &NetworkSpec, device: &B::Device) -> Self {
        let config = ClassifierConfig::new(spec.input_channels, spec.output_channels)
            .with_base_filters(spec.base_filters)
            .with_dropout(spec.head_dropout());

        let backbone = match spec.dimensions {
            Dimensionality::Two => ClassifierBackbone::Planar(config.init(device)),
            Dimensionality::Three => ClassifierBackbone::Volumetric(config.init_3d(device)),
        };

        Self {
            backbone,
            num_classes: spec.output_channels,
            base_filters: spec.base_filters,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl<B: Backend> TaskModel<B> for Classifier<B> {
    fn forward_probs(&self, inputs: Tensor<B, 5>) -> Tensor<B, 2> {
        let logits = match &self.backbone {
            ClassifierBackbone::Planar(net) => net.forward(inputs.squeeze::<4>(2)),
            ClassifierBackbone::Volumetric(net) => net.forward(inputs),
        };

        softmax(logits, 1)
    }

    fn describe(&self) -> String {
        let kind = match self.backbone {
            ClassifierBackbone::Planar(_) => "2D",
            ClassifierBackbone::Volumetric(_) => "3D",
        };
        format!(
            "{kind} residual classifier, 3 stages, {} base filters, {} classes, softmax, {} parameters",
            self.base_filters,
            self.num_classes,
            self.num_params()
        )
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    type TestBackend = NdArray;

    #[test]
    fn probabilities_sum_to_one() {
        let device = Default::default();
        let spec = NetworkSpec::new(Dimensionality::Two, 3, 4, 2, false);
        let net = Classifier::<TestBackend>::build(&spec, &device);

        let probs = net.forward_probs(Tensor::ones([2, 3, 1, 12, 10], &device));
        assert_eq!(probs.dims(), [2, 4]);

        let sums: Vec<f32> = probs.sum_dim(1).into_data().iter::<f32>().collect();
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-4));
    }

    #[test]
    fn volumetric_classifier_accepts_thin_stacks() {
        let device = Default::default();
        let spec = NetworkSpec::new(Dimensionality::Three, 1, 2, 2, true);
        let net = Classifier::<TestBackend>::build(&spec, &device);

        let probs = net.forward_probs(Tensor::ones([1, 1, 3, 8, 8], &device));
        assert_eq!(probs.dims(), [1, 2]);
    }

    #[test]
    fn backbone_follows_dimensionality() {
        let device = Default::default();
        let planar = Classifier::<TestBackend>::build(
            &NetworkSpec::new(Dimensionality::Two, 1, 2, 2, false),
            &device,
        );
        let volumetric = Classifier::<TestBackend>::build(
            &NetworkSpec::new(Dimensionality::Three, 1, 2, 2, false),
            &device,
        );

        assert!(matches!(planar.backbone, ClassifierBackbone::Planar(_)));
        assert!(matches!(volumetric.backbone, ClassifierBackbone::Volumetric(_)));
        assert!(volumetric.describe().starts_with("3D residual classifier"));
    }
}
