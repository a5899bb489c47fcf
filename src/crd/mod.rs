mod apiserver_autoscaler;

pub use apiserver_autoscaler::*;
