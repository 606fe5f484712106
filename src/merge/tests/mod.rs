mod tests_merge;
