/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use blockring::{BlockReader, RingResult};
use tracing::info;

/// Fetch one block synchronously: submit the read, block for its completion,
/// and copy out the valid bytes.
///
/// The returned vector holds exactly `bytes_read` bytes — possibly fewer than a
/// block at end-of-file, and empty for a block entirely beyond it. Expects no
/// other requests in flight on `reader`.
pub fn fetch_block<R: BlockReader>(reader: &mut R, block_number: u64) -> RingResult<Vec<u8>> {
    let token = reader.submit(block_number)?;
    let completion = reader.wait()?;
    debug_assert_eq!(
        completion.token, token,
        "completion does not correlate to the submitted request"
    );

    let bytes = reader.data(completion.token)?.to_vec();
    reader.release(completion.token)?;

    info!(
        block_number,
        bytes_read = bytes.len(),
        "block fetched"
    );
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use blockring::{Completion, ReadToken, RingError, RingResult};

    use super::*;
    use crate::utils::init_test_subscriber;

    // Mock implementation for testing
    struct MockBlockReader {
        content: Vec<u8>,
        block_size: usize,
        pending: Option<(ReadToken, u64)>,
        completed: Option<(ReadToken, Vec<u8>)>,
        generation: u32,
    }

    impl MockBlockReader {
        fn new(content: Vec<u8>, block_size: usize) -> Self {
            Self {
                content,
                block_size,
                pending: None,
                completed: None,
                generation: 0,
            }
        }
    }

    impl BlockReader for MockBlockReader {
        fn submit(&mut self, block_number: u64) -> RingResult<ReadToken> {
            if self.pending.is_some() {
                return Err(RingError::log_invalid_operation("one request at a time"));
            }
            let token = ReadToken::new(0, self.generation);
            self.generation += 1;
            self.pending = Some((token, block_number));
            Ok(token)
        }

        fn wait(&mut self) -> RingResult<Completion> {
            let (token, block_number) = self
                .pending
                .take()
                .ok_or_else(|| RingError::log_invalid_operation("nothing in flight"))?;
            let offset = block_number as usize * self.block_size;
            let data = if offset >= self.content.len() {
                Vec::new()
            } else {
                let end = self.content.len().min(offset + self.block_size);
                self.content[offset..end].to_vec()
            };
            let bytes_read = data.len();
            self.completed = Some((token, data));
            Ok(Completion { token, bytes_read })
        }

        fn data(&self, token: ReadToken) -> RingResult<&[u8]> {
            match &self.completed {
                Some((completed, data)) if *completed == token => Ok(data),
                _ => Err(RingError::log_stale_completion("unknown token")),
            }
        }

        fn release(&mut self, token: ReadToken) -> RingResult<()> {
            match self.completed.take_if(|(completed, _)| *completed == token) {
                Some(_) => Ok(()),
                None => Err(RingError::log_stale_completion("unknown token")),
            }
        }

        fn block_size(&self) -> usize {
            self.block_size
        }
    }

    #[test]
    fn fetches_a_full_block() {
        let _guard = init_test_subscriber();
        let content: Vec<u8> = (0..=255).cycle().take(64).collect();
        let mut reader = MockBlockReader::new(content.clone(), 16);

        let bytes = fetch_block(&mut reader, 1).unwrap();
        assert_eq!(bytes, &content[16..32]);
    }

    #[test]
    fn fetches_a_short_tail_block() {
        let mut reader = MockBlockReader::new(vec![0xAA; 20], 16);
        let bytes = fetch_block(&mut reader, 1).unwrap();
        assert_eq!(bytes, vec![0xAA; 4]);
    }

    #[test]
    fn block_beyond_end_of_file_is_empty() {
        let mut reader = MockBlockReader::new(vec![0xAA; 20], 16);
        let bytes = fetch_block(&mut reader, 5).unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn consecutive_fetches_are_identical() {
        let content: Vec<u8> = (0..64).map(|i| (i * 7 % 251) as u8).collect();
        let mut reader = MockBlockReader::new(content, 16);
        let first = fetch_block(&mut reader, 2).unwrap();
        let second = fetch_block(&mut reader, 2).unwrap();
        assert_eq!(first, second);
    }
}
