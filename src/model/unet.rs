use burn::{
    nn::{
        PaddingConfig2d, PaddingConfig3d, Sigmoid,
        conv::{Conv2d, Conv2dConfig, Conv3d, Conv3dConfig},
    },
    prelude::*,
};

use super::blocks::{
    DoubleConv2d, DoubleConv3d, DoubleConvConfig, Down2d, Down3d, LevelConfig, Up2d, Up3d,
};
use super::{Dimensionality, NetworkSpec, TaskModel};
use crate::error::PipelineError;

#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    down_1: Down2d<B>,
    down_2: Down2d<B>,
    down_3: Down2d<B>,
    down_4: Down2d<B>,
    bottleneck: DoubleConv2d<B>,
    up_1: Up2d<B>,
    up_2: Up2d<B>,
    up_3: Up2d<B>,
    up_4: Up2d<B>,
    conv: Conv2d<B>,
    conv_1x1: Conv2d<B>,
}

impl<B: Backend> UNet<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let (x, skip_1) = self.down_1.forward(images);
        let (x, skip_2) = self.down_2.forward(x);
        let (x, skip_3) = self.down_3.forward(x);
        let (x, skip_4) = self.down_4.forward(x);

        let x = self.bottleneck.forward(x);

        let x = self.up_1.forward(x, skip_4);
        let x = self.up_2.forward(x, skip_3);
        let x = self.up_3.forward(x, skip_2);
        let x = self.up_4.forward(x, skip_1);

        let x = self.conv.forward(x);
        let x = self.conv_1x1.forward(x);

        Sigmoid::new().forward(x)
    }
}

/// Volumetric U-Net with three strided levels.
#[derive(Module, Debug)]
pub struct UNet3d<B: Backend> {
    input_block: DoubleConv3d<B>,
    down_1: Down3d<B>,
    down_2: Down3d<B>,
    down_3: Down3d<B>,
    up_1: Up3d<B>,
    up_2: Up3d<B>,
    up_3: Up3d<B>,
    conv_1x1: Conv3d<B>,
}

impl<B: Backend> UNet3d<B> {
    pub fn forward(&self, volumes: Tensor<B, 5>) -> Tensor<B, 5> {
        let skip_1 = self.input_block.forward(volumes);
        let skip_2 = self.down_1.forward(skip_1.clone());
        let skip_3 = self.down_2.forward(skip_2.clone());
        let x = self.down_3.forward(skip_3.clone());

        let x = self.up_1.forward(x, skip_3);
        let x = self.up_2.forward(x, skip_2);
        let x = self.up_3.forward(x, skip_1);

        Sigmoid::new().forward(self.conv_1x1.forward(x))
    }
}

#[derive(Config, Debug)]
pub struct UNetConfig {
    input_channels: usize,
    #[config(default = "1")]
    output_channels: usize,
    #[config(default = "64")]
    base_channels: usize,
    #[config(default = "0.2")]
    dropout: f64,
}

impl UNetConfig {
    /// Input extents must be divisible by this for the 2D network.
    pub const PLANAR_DIVISOR: usize = 16;
    /// Input extents must be divisible by this for the 3D network.
    pub const VOLUMETRIC_DIVISOR: usize = 8;

    fn level(&self, input_channels: usize, num_filters: usize) -> LevelConfig {
        LevelConfig::new(input_channels, num_filters).with_dropout(self.dropout)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> UNet<B> {
        let base = self.base_channels;

        UNet {
            down_1: self.level(self.input_channels, base).init_down_2d(device),
            down_2: self.level(base, base * 2).init_down_2d(device),
            down_3: self.level(base * 2, base * 4).init_down_2d(device),
            down_4: self.level(base * 4, base * 8).init_down_2d(device),
            bottleneck: DoubleConvConfig::new(base * 8, base * 16)
                .with_dropout(self.dropout)
                .init_2d(device),
            up_1: self.level(base * 16, base * 8).init_up_2d(device),
            up_2: self.level(base * 8, base * 4).init_up_2d(device),
            up_3: self.level(base * 4, base * 2).init_up_2d(device),
            up_4: self.level(base * 2, base).init_up_2d(device),
            conv: Conv2dConfig::new([base, base], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            conv_1x1: Conv2dConfig::new([base, self.output_channels], [1, 1]).init(device),
        }
    }

    pub fn init_3d<B: Backend>(&self, device: &B::Device) -> UNet3d<B> {
        let base = self.base_channels;

        UNet3d {
            input_block: DoubleConvConfig::new(self.input_channels, base)
                .with_dropout(self.dropout)
                .init_3d(device),
            down_1: self.level(base, base * 2).init_down_3d(device),
            down_2: self.level(base * 2, base * 4).init_down_3d(device),
            down_3: self.level(base * 4, base * 8).init_down_3d(device),
            up_1: self.level(base * 8, base * 4).init_up_3d(device),
            up_2: self.level(base * 4, base * 2).init_up_3d(device),
            up_3: self.level(base * 2, base).init_up_3d(device),
            conv_1x1: Conv3dConfig::new([base, self.output_channels], [1, 1, 1])
                .with_padding(PaddingConfig3d::Valid)
                .init(device),
        }
    }
}

/// The U-Net variant matching the data dimensionality.
#[derive(Module, Debug)]
pub enum UNetBackbone<B: Backend> {
    Planar(UNet<B>),
    Volumetric(UNet3d<B>),
}

/// Dense-prediction network for semantic segmentation and regression.
#[derive(Module, Debug)]
pub struct SegmentationNet<B: Backend> {
    backbone: UNetBackbone<B>,
    output_channels: usize,
    base_filters: usize,
}

impl<B: Backend> SegmentationNet<B> {
    /// Build the U-Net matching `spec`, checking that `spatial` survives every pooling level.
    pub fn build(spec: &NetworkSpec, spatial: &[usize], device: &B::Device) -> crate::error::Result<Self> {
        let config = UNetConfig::new(spec.input_channels)
            .with_output_channels(spec.output_channels)
            .with_base_channels(spec.base_filters);

        let divisor = match spec.dimensions {
            Dimensionality::Two => UNetConfig::PLANAR_DIVISOR,
            Dimensionality::Three => UNetConfig::VOLUMETRIC_DIVISOR,
        };
        if spatial.iter().any(|extent| extent % divisor != 0) {
            return Err(PipelineError::configuration(format!(
                "U-Net input extents must be divisible by {divisor}, got {spatial:?}; set image_size accordingly"
            )));
        }

        let backbone = match spec.dimensions {
            Dimensionality::Two => UNetBackbone::Planar(config.init(device)),
            Dimensionality::Three => UNetBackbone::Volumetric(config.init_3d(device)),
        };

        Ok(Self {
            backbone,
            output_channels: spec.output_channels,
            base_filters: spec.base_filters,
        })
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }
}

impl<B: Backend> TaskModel<B> for SegmentationNet<B> {
    fn forward_probs(&self, inputs: Tensor<B, 5>) -> Tensor<B, 2> {
        match &self.backbone {
            UNetBackbone::Planar(net) => net.forward(inputs.squeeze::<4>(2)).flatten::<2>(1, 3),
            UNetBackbone::Volumetric(net) => net.forward(inputs).flatten::<2>(1, 4),
        }
    }

    fn describe(&self) -> String {
        let kind = match self.backbone {
            UNetBackbone::Planar(_) => "2D U-Net, 4 levels",
            UNetBackbone::Volumetric(_) => "3D U-Net, 3 levels",
        };
        format!(
            "{kind}, {} base filters, {} output channel(s), sigmoid, {} parameters",
            self.base_filters,
            self.output_channels,
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
    fn planar_output_matches_flattened_label_shape() {
        let device = Default::default();
        let spec = NetworkSpec::new(Dimensionality::Two, 2, 1, 2, false);
        let net = SegmentationNet::<TestBackend>::build(&spec, &[16, 16], &device).unwrap();

        let probs = net.forward_probs(Tensor::zeros([2, 2, 1, 16, 16], &device));

        assert_eq!(probs.dims(), [2, 256]);
    }

    #[test]
    fn volumetric_output_matches_flattened_label_shape() {
        let device = Default::default();
        let spec = NetworkSpec::new(Dimensionality::Three, 1, 1, 2, false);
        let net = SegmentationNet::<TestBackend>::build(&spec, &[8, 8, 8], &device).unwrap();

        let probs = net.forward_probs(Tensor::zeros([1, 1, 8, 8, 8], &device));

        assert_eq!(probs.dims(), [1, 512]);
        assert!(matches!(net.backbone, UNetBackbone::Volumetric(_)));
        assert!(net.describe().starts_with("3D U-Net"));
        let values: Vec<f32> = probs.into_data().iter::<f32>().collect();
        assert!(values.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn indivisible_extent_is_configuration_error() {
        let device = Default::default();
        let spec = NetworkSpec::new(Dimensionality::Two, 1, 1, 2, false);
        let err = SegmentationNet::<TestBackend>::build(&spec, &[20, 16], &device).unwrap_err();

        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
