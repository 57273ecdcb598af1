use burn::{
    nn::{
        Dropout, DropoutConfig, PaddingConfig2d, PaddingConfig3d, Relu,
        conv::{
            Conv2d, Conv2dConfig, Conv3d, Conv3dConfig, ConvTranspose2d, ConvTranspose2dConfig,
            ConvTranspose3d, ConvTranspose3dConfig,
        },
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    prelude::*,
};

/// Two 3x3 convolutions with dropout between them.
#[derive(Module, Debug)]
pub struct DoubleConv2d<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    activation: Relu,
    dropout: Dropout,
}

impl<B: Backend> DoubleConv2d<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);
        let x = self.conv2.forward(x);

        self.activation.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct DoubleConvConfig {
    input_channels: usize,
    num_filters: usize,
    #[config(default = "0.2")]
    dropout: f64,
}

impl DoubleConvConfig {
    pub fn init_2d<B: Backend>(&self, device: &B::Device) -> DoubleConv2d<B> {
        DoubleConv2d {
            conv1: Conv2dConfig::new([self.input_channels, self.num_filters], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            conv2: Conv2dConfig::new([self.num_filters, self.num_filters], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            activation: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }

    pub fn init_3d<B: Backend>(&self, device: &B::Device) -> DoubleConv3d<B> {
        DoubleConv3d {
            conv1: Conv3dConfig::new([self.input_channels, self.num_filters], [3, 3, 3])
                .with_padding(PaddingConfig3d::Same)
                .init(device),
            conv2: Conv3dConfig::new([self.num_filters, self.num_filters], [3, 3, 3])
                .with_padding(PaddingConfig3d::Same)
                .init(device),
            activation: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// Conv block followed by 2x2 max pooling. Returns the pooled map and the skip features.
#[derive(Module, Debug)]
pub struct Down2d<B: Backend> {
    block: DoubleConv2d<B>,
    max_pool: MaxPool2d,
}

impl<B: Backend> Down2d<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let skip = self.block.forward(x);
        let x = self.max_pool.forward(skip.clone());

        (x, skip)
    }
}

#[derive(Module, Debug)]
pub struct Up2d<B: Backend> {
    conv_transpose: ConvTranspose2d<B>,
    block: DoubleConv2d<B>,
}

impl<B: Backend> Up2d<B> {
    pub fn forward(&self, x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv_transpose.forward(x);
        let x = Tensor::cat(vec![x, skip], 1);

        self.block.forward(x)
    }
}

/// Encoder/decoder level of a U-Net: `input_channels -> num_filters` on the way down,
/// `input_channels -> num_filters` plus skip concatenation on the way up.
#[derive(Config, Debug)]
pub struct LevelConfig {
    input_channels: usize,
    num_filters: usize,
    #[config(default = "0.2")]
    dropout: f64,
}

impl LevelConfig {
    fn block(&self, input_channels: usize) -> DoubleConvConfig {
        DoubleConvConfig::new(input_channels, self.num_filters).with_dropout(self.dropout)
    }

    pub fn init_down_2d<B: Backend>(&self, device: &B::Device) -> Down2d<B> {
        Down2d {
            block: self.block(self.input_channels).init_2d(device),
            max_pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn init_up_2d<B: Backend>(&self, device: &B::Device) -> Up2d<B> {
        Up2d {
            conv_transpose: ConvTranspose2dConfig::new(
                [self.input_channels, self.num_filters],
                [2, 2],
            )
            .with_stride([2, 2])
            .init(device),
            block: self.block(self.num_filters * 2).init_2d(device),
        }
    }

    /// Strided 3x3x3 convolution halving every extent, then a conv block.
    pub fn init_down_3d<B: Backend>(&self, device: &B::Device) -> Down3d<B> {
        Down3d {
            conv: Conv3dConfig::new([self.input_channels, self.num_filters], [3, 3, 3])
                .with_stride([2, 2, 2])
                .with_padding(PaddingConfig3d::Explicit(1, 1, 1))
                .init(device),
            activation: Relu::new(),
            block: self.block(self.num_filters).init_3d(device),
        }
    }

    pub fn init_up_3d<B: Backend>(&self, device: &B::Device) -> Up3d<B> {
        Up3d {
            conv_transpose: ConvTranspose3dConfig::new(
                [self.input_channels, self.num_filters],
                [2, 2, 2],
            )
            .with_stride([2, 2, 2])
            .init(device),
            block: self.block(self.num_filters * 2).init_3d(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct DoubleConv3d<B: Backend> {
    conv1: Conv3d<B>,
    conv2: Conv3d<B>,
    activation: Relu,
    dropout: Dropout,
}

impl<B: Backend> DoubleConv3d<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = self.conv1.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);
        let x = self.conv2.forward(x);

        self.activation.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct Down3d<B: Backend> {
    conv: Conv3d<B>,
    activation: Relu,
    block: DoubleConv3d<B>,
}

impl<B: Backend> Down3d<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = self.conv.forward(x);
        let x = self.activation.forward(x);

        self.block.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct Up3d<B: Backend> {
    conv_transpose: ConvTranspose3d<B>,
    block: DoubleConv3d<B>,
}

impl<B: Backend> Up3d<B> {
    pub fn forward(&self, x: Tensor<B, 5>, skip: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = self.conv_transpose.forward(x);
        let x = Tensor::cat(vec![x, skip], 1);

        self.block.forward(x)
    }
}

/// Two 3x3 convolutions with a projected shortcut, the first one strided by 2.
#[derive(Module, Debug)]
pub struct Residual2d<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    shortcut: Conv2d<B>,
    activation: Relu,
}

impl<B: Backend> Residual2d<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = self.shortcut.forward(x.clone());

        let x = self.conv1.forward(x);
        let x = self.activation.forward(x);
        let x = self.conv2.forward(x);

        self.activation.forward(x + identity)
    }
}

#[derive(Module, Debug)]
pub struct Residual3d<B: Backend> {
    conv1: Conv3d<B>,
    conv2: Conv3d<B>,
    shortcut: Conv3d<B>,
    activation: Relu,
}

impl<B: Backend> Residual3d<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let identity = self.shortcut.forward(x.clone());

        let x = self.conv1.forward(x);
        let x = self.activation.forward(x);
        let x = self.conv2.forward(x);

        self.activation.forward(x + identity)
    }
}

#[derive(Config, Debug)]
pub struct ResidualConfig {
    input_channels: usize,
    num_filters: usize,
}

impl ResidualConfig {
    pub fn init_2d<B: Backend>(&self, device: &B::Device) -> Residual2d<B> {
        let channels = [self.input_channels, self.num_filters];
        Residual2d {
            conv1: Conv2dConfig::new(channels, [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            conv2: Conv2dConfig::new([self.num_filters, self.num_filters], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            shortcut: Conv2dConfig::new(channels, [1, 1])
                .with_stride([2, 2])
                .init(device),
            activation: Relu::new(),
        }
    }

    pub fn init_3d<B: Backend>(&self, device: &B::Device) -> Residual3d<B> {
        let channels = [self.input_channels, self.num_filters];
        Residual3d {
            conv1: Conv3dConfig::new(channels, [3, 3, 3])
                .with_stride([2, 2, 2])
                .with_padding(PaddingConfig3d::Explicit(1, 1, 1))
                .init(device),
            conv2: Conv3dConfig::new([self.num_filters, self.num_filters], [3, 3, 3])
                .with_padding(PaddingConfig3d::Same)
                .init(device),
            shortcut: Conv3dConfig::new(channels, [1, 1, 1])
                .with_stride([2, 2, 2])
                .init(device),
            activation: Relu::new(),
        }
    }
}
