pub fn thread_name(n: u32) -> String {
    format!("thread_{:03}", n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_name() {
        assert_eq!("thread_000".to_string(), thread_name(0));
        assert_eq!("thread_999".to_string(), thread_name(999));
        assert_eq!("thread_1000".to_string(), thread_name(1000));
    }
}
