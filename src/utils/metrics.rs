//! Classification metrics

/// Confusion matrix indexed `[true][predicted]`
pub fn confusion_matrix(predictions: &[usize], labels: &[usize], num_classes: usize) -> Vec<Vec<usize>> {
    let mut matrix = vec![vec![0; num_classes]; num_classes];
    for (&pred, &label) in predictions.iter().zip(labels) {
        if pred < num_classes && label < num_classes {
            matrix[label][pred] += 1;
        }
    }
    matrix
}

/// Recall of every class; `None` for classes absent from `labels`
pub fn per_class_recall(predictions: &[usize], labels: &[usize], num_classes: usize) -> Vec<Option<f64>> {
    confusion_matrix(predictions, labels, num_classes)
        .iter()
        .enumerate()
        .map(|(class, row)| {
            let support: usize = row.iter().sum();
            (support > 0).then(|| row[class] as f64 / support as f64)
        })
        .collect()
}

/// Mean recall over the classes present in `labels`
pub fn balanced_accuracy(predictions: &[usize], labels: &[usize], num_classes: usize) -> f64 {
    let recalls: Vec<f64> = per_class_recall(predictions, labels, num_classes)
        .into_iter()
        .flatten()
        .collect();
    if recalls.is_empty() {
        return 0.0;
    }
    recalls.iter().sum::<f64>() / recalls.len() as f64
}
