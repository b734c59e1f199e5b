//! Block-level copy and content-digest commands.

use crate::HalResult;

pub trait CopyOps {
    /// Stream `dd if=/dev/<source> of=/dev/<dest>` with `conv=sync,noerror`
    /// and progress-capable diagnostic output.
    ///
    /// `on_diag_line` receives each line of the command's diagnostic stream
    /// as it arrives; it returns `true` to continue or `false` to abort the
    /// copy. Output must be streamed, never buffered whole.
    fn dd_copy(
        &self,
        source: &str,
        dest: &str,
        block_size: u64,
        on_diag_line: &mut dyn FnMut(&str) -> bool,
    ) -> HalResult<()>;

    /// `sha256 -q /dev/<device>` — whole-partition content digest.
    fn sha256_digest(&self, device: &str) -> HalResult<String>;
}
