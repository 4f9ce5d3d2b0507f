pub fn log_transaction_event(component: &str, transaction_id: &str, event: &str, message: &str) {
    println!(
        "[{}][txn:{}][{}] {}",
        component, transaction_id, event, message
    );
}
