/// Console lines for predictions and metrics.

use crate::metrics::MulticlassMetrics;
use crate::pipeline::Prediction;

pub fn prediction_line(prediction: &Prediction) -> String
{
    let file_name = prediction.image_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| prediction.image_path.display().to_string());
    format!("Image: {} predicted as: {} with score: {}", file_name, prediction.predicted_label, prediction.max_score())
}

pub fn metrics_lines(metrics: &MulticlassMetrics) -> Vec<String>
{
    let per_class: Vec<String> = metrics.per_class_log_loss.iter().map(|loss| loss.to_string()).collect();
    vec![
        format!("LogLoss is: {}", metrics.log_loss),
        format!("PerClassLogLoss is: {}", per_class.join(" , ")),
        format!("LogLossReduction is: {}", metrics.log_loss_reduction),
        format!("MicroAccuracy is: {}", metrics.micro_accuracy),
        format!("MacroAccuracy is: {}", metrics.macro_accuracy),
    ]
}

pub fn print_predictions(predictions: &[Prediction])
{
    for prediction in predictions
    {
        println!("{}", prediction_line(prediction));
    }
}

pub fn print_metrics(metrics: &MulticlassMetrics)
{
    for line in metrics_lines(metrics)
    {
        println!("{}", line);
    }
}
