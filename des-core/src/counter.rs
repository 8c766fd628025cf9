/*!
A counter that can be used to count frequencies of a set of objects. The counter starts
with no keys. When an unknown key is incremented, the counter adds a new key to an
internal map and sets the count for that key to 1. When a known key is incremented, the
count for that key increases. The state of the counter can be extracted by converting it
to a string, which lists the counts for all keys sorted with the heaviest hitters first.
Currently, only String types are supported, but we may eventually support counting
generic types.
*/

use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result};
use std::iter::FromIterator;

/// The main counter object that maps individual keys to count values.
#[derive(Default, Clone)]
pub struct Counter {
    items: HashMap<String, u64>,
}

/// The supported operations on the values stored in this counter.
enum CounterOperation {
    Add,
    Set,
    Subtract,
}

impl Counter {
    /// Initializes a new counter map that starts with no keys.
    pub fn new() -> Counter {
        Counter {
            items: HashMap::new(),
        }
    }

    /// Increment the counter value by one for the key given by id.
    /// Returns the value of the counter after it was incremented.
    pub fn add_one(&mut self, id: &str) -> u64 {
        self.operate(id, CounterOperation::Add, 1)
    }

    /// Decrement the counter value by one for the key given by id.
    /// If the decrement would produce a negative counter value, it is set to 0 instead.
    /// Returns the value of the counter after it was decremented.
    pub fn sub_one(&mut self, id: &str) -> u64 {
        self.operate(id, CounterOperation::Subtract, 1)
    }

    /// Increment the counter value by the given value for the key given by id.
    /// Returns the value of the counter after it was incremented.
    pub fn add_value(&mut self, id: &str, value: u64) -> u64 {
        self.operate(id, CounterOperation::Add, value)
    }

    /// Decrement the counter value by the given value for the key given by id.
    /// If the decrement would produce a negative counter value, it is set to 0 instead.
    /// Returns the value of the counter after it was decremented.
    pub fn sub_value(&mut self, id: &str, value: u64) -> u64 {
        self.operate(id, CounterOperation::Subtract, value)
    }

    /// Sets the counter value to the given value for the key given by id.
    /// Returns the value of the counter after it was set.
    pub fn set_value(&mut self, id: &str, value: u64) -> u64 {
        self.operate(id, CounterOperation::Set, value)
    }

    /// Returns the counter value for the key given by id, or 0 if no operations have
    /// been performed on the key.
    pub fn get_value(&mut self, id: &str) -> u64 {
        match self.items.get(&id.to_string()) {
            Some(val) => *val,
            None => 0,
        }
    }

    /// Iterates over every key currently tracked, in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.items.iter()
    }

    /// Perform a supported operation on the counter value.
    fn operate(&mut self, id: &str, op: CounterOperation, value: u64) -> u64 {
        match self.items.get_mut(id) {
            Some(val) => {
                match op {
                    CounterOperation::Add => *val += value,
                    CounterOperation::Subtract => {
                        if value < *val {
                            *val -= value
                        } else {
                            *val = 0
                        }
                    }
                    CounterOperation::Set => *val = value,
                }
                *val
            }
            None => {
                assert_eq!(self.items.insert(id.to_string(), 0), None);
                self.operate(id, op, value)
            }
        }
    }
}

impl Display for Counter {
    /// Returns a string representation of the counter in the form
    ///   `{key1:value1, key2:value2, ..., keyN:valueN}`
    /// for known keys and values, where the list is sorted by value with the
    /// largest value first.
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let mut item_vec = Vec::from_iter(&self.items);
        item_vec.sort_by(|&(_, a), &(_, b)| b.cmp(&a));

        write!(f, "{{")?;
        for i in 0..item_vec.len() {
            write!(f, "{}:{}", item_vec[i].0, item_vec[i].1)?;
            if i < (item_vec.len() - 1) {
                write!(f, ", ")?;
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_value() {
        let mut counter = Counter::new();
        assert_eq!(counter.set_value("read", 100), 100);
        assert_eq!(counter.set_value("read", 10), 10);
        assert_eq!(counter.set_value("read", 0), 0);
        assert_eq!(counter.set_value("read", 10), 10);
    }

    #[test]
    fn test_get_value() {
        let mut counter = Counter::new();
        assert_eq!(counter.get_value("read"), 0);
        assert_eq!(counter.get_value("write"), 0);
        assert_eq!(counter.get_value("close"), 0);
        counter.add_one("write");
        counter.add_one("write");
        counter.add_one("read");
        counter.add_one("write");
        assert_eq!(counter.get_value("read"), 1);
        assert_eq!(counter.get_value("write"), 3);
        assert_eq!(counter.get_value("close"), 0);
    }

    #[test]
    fn test_add_one() {
        let mut counter = Counter::new();
        assert_eq!(counter.add_one("read"), 1);
        assert_eq!(counter.add_one("read"), 2);
        assert_eq!(counter.add_one("write"), 1);
        assert_eq!(counter.add_one("read"), 3);
    }

    #[test]
    fn test_sub_one() {
        let mut counter = Counter::new();
        counter.set_value("read", 2);
        assert_eq!(counter.sub_one("read"), 1);
        assert_eq!(counter.sub_one("read"), 0);
        assert_eq!(counter.sub_one("read"), 0);
        counter.set_value("read", 100);
        counter.set_value("write", 100);
        assert_eq!(counter.sub_one("read"), 99);
    }

    #[test]
    fn test_add_value() {
        let mut counter = Counter::new();
        assert_eq!(counter.add_value("read", 10), 10);
        assert_eq!(counter.add_value("read", 10), 20);
        assert_eq!(counter.add_value("write", 10), 10);
        assert_eq!(counter.add_value("read", 10), 30);
    }

    #[test]
    fn test_sub_value() {
        let mut counter = Counter::new();
        counter.set_value("read", 100);
        assert_eq!(counter.sub_value("read", 10), 90);
        assert_eq!(counter.sub_value("read", 10), 80);
        assert_eq!(counter.sub_value("write", 10), 0);
        assert_eq!(counter.sub_value("read", 10), 70);
    }

    #[test]
    fn test_to_string() {
        let mut counter = Counter::new();

        counter.add_one("read");
        counter.add_one("read");
        counter.add_one("close");
        counter.add_one("write");
        counter.add_one("write");
        counter.add_one("write");

        assert_eq!(
            counter.to_string(),
            String::from("{write:3, read:2, close:1}")
        );

        counter.add_one("read");
        counter.add_one("read");

        assert_eq!(
            counter.to_string(),
            String::from("{read:4, write:3, close:1}")
        );
    }
}
