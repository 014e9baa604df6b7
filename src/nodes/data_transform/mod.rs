mod template;

pub use template::TemplateTransformExecutor;
